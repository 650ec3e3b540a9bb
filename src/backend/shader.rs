// Shader module loading
//
// The compute shader is compiled to SPIR-V by build.rs (or by hand) and read
// from disk at setup time.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use super::VulkanDevice;

/// Read a SPIR-V binary into 32-bit words.
///
/// Files whose length is not a multiple of 4 are zero-padded rather than
/// rejected. The magic number is checked and byte order fixed by
/// `ash::util::read_spv`.
pub fn load_spirv<P: AsRef<Path>>(path: P) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Could not find or open shader file: {:?}", path))?;
    decode_spirv(bytes).with_context(|| format!("Invalid SPIR-V in {:?}", path))
}

fn decode_spirv(mut bytes: Vec<u8>) -> Result<Vec<u32>> {
    let padded = bytes.len().div_ceil(4) * 4;
    bytes.resize(padded, 0);
    Ok(ash::util::read_spv(&mut Cursor::new(bytes))?)
}

/// Create a shader module from SPIR-V words
pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder()
        .code(code);

    unsafe {
        device.device.create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: u32 = 0x0723_0203;

    #[test]
    fn decodes_little_endian_words() {
        let mut bytes = MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        let words = decode_spirv(bytes).unwrap();
        assert_eq!(words, vec![MAGIC, 0x0001_0000]);
    }

    #[test]
    fn pads_trailing_bytes() {
        let mut bytes = MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0xAB, 0xCD]);
        let words = decode_spirv(bytes).unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(words[1], u32::from_le_bytes([0xAB, 0xCD, 0, 0]));
    }

    #[test]
    fn rejects_missing_magic() {
        assert!(decode_spirv(vec![1, 2, 3, 4, 5, 6, 7, 8]).is_err());
    }

    #[test]
    fn missing_file_names_path() {
        let err = load_spirv("no/such/shader.spv").unwrap_err();
        assert!(format!("{:#}", err).contains("no/such/shader.spv"));
    }
}
