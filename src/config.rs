// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Every section has defaults, so a missing file (or a partial one) is fine.
// Values are checked by `Config::validate` before any Vulkan object exists.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub volume: VolumeConfig,
    pub shader: ShaderConfig,
    pub fractal: FractalConfig,
    pub compute: ComputeConfig,
    pub debug: DebugConfig,
    pub output: OutputConfig,
}

/// Size of the rendered volume and how it is split into workgroups
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct VolumeConfig {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Edge length of the cubic workgroup, fed to the shader as
    /// specialization constants.
    pub workgroup_size: u32,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            depth: 256,
            workgroup_size: 8,
        }
    }
}

/// Compute shader location
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShaderConfig {
    pub path: PathBuf,
    pub entry_point: String,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("shaders/mandelbrot.comp.spv"),
            entry_point: "main".to_string(),
        }
    }
}

/// Fractal parameters, passed to the shader as push constants
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FractalConfig {
    pub max_iterations: u32,
    pub power: f32,
    pub bailout: f32,
    pub center: [f32; 3],
    /// Half the edge length of the sampled cube in fractal space
    pub half_extent: f32,
}

impl Default for FractalConfig {
    fn default() -> Self {
        Self {
            max_iterations: 64,
            power: 8.0,
            bailout: 2.0,
            center: [0.0, 0.0, 0.0],
            half_extent: 1.2,
        }
    }
}

/// Submission settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ComputeConfig {
    /// Fence wait timeout in nanoseconds
    pub fence_timeout_ns: u64,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            fence_timeout_ns: 100_000_000_000,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: PathBuf,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_to_file: false,
            log_file: PathBuf::from("vudo.log"),
        }
    }
}

/// Where to put the scalar channel once it has been read back
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub raw_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject values that would produce an empty or undefined dispatch
    pub fn validate(&self) -> Result<()> {
        let v = &self.volume;
        if v.width == 0 || v.height == 0 || v.depth == 0 {
            anyhow::bail!(
                "Volume dimensions must be non-zero, got {}x{}x{}",
                v.width,
                v.height,
                v.depth
            );
        }
        if v.workgroup_size == 0 {
            anyhow::bail!("Workgroup size must be non-zero");
        }

        let f = &self.fractal;
        if f.max_iterations == 0 {
            anyhow::bail!("max_iterations must be non-zero");
        }
        if !(f.half_extent > 0.0) {
            anyhow::bail!("half_extent must be positive, got {}", f.half_extent);
        }
        if !(f.bailout > 0.0) {
            anyhow::bail!("bailout must be positive, got {}", f.bailout);
        }

        if self.compute.fence_timeout_ns == 0 {
            anyhow::bail!("fence_timeout_ns must be non-zero");
        }
        if self.shader.entry_point.is_empty() {
            anyhow::bail!("Shader entry point must not be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.volume.workgroup_size, 8);
        assert_eq!(config.compute.fence_timeout_ns, 100_000_000_000);
        assert_eq!(config.shader.entry_point, "main");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [volume]
            width = 64

            [fractal]
            power = 4.0
            "#,
        )
        .unwrap();

        assert_eq!(config.volume.width, 64);
        assert_eq!(config.volume.height, 256);
        assert_eq!(config.fractal.power, 4.0);
        assert_eq!(config.fractal.max_iterations, 64);
        assert_eq!(config.output.raw_path, None);
    }

    #[test]
    fn output_path_parses() {
        let config = Config::from_toml("[output]\nraw_path = \"out/volume.raw\"\n").unwrap();
        assert_eq!(config.output.raw_path, Some(PathBuf::from("out/volume.raw")));
    }

    #[test]
    fn rejects_unknown_types() {
        assert!(Config::from_toml("[volume]\nwidth = \"wide\"\n").is_err());
    }

    #[test]
    fn rejects_zero_dimension() {
        let mut config = Config::default();
        config.volume.depth = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("non-zero"));
    }

    #[test]
    fn rejects_bad_fractal_params() {
        let mut config = Config::default();
        config.fractal.half_extent = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fractal.bailout = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.fractal.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_timeout_and_workgroup() {
        let mut config = Config::default();
        config.compute.fence_timeout_ns = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.volume.workgroup_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("definitely/not/here/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }
}
