// Volume layout and host-side access to the rendered pixels
//
// The GPU writes one `Pixel` per voxel in x-major order:
//   index(x, y, z) = (x * height + y) * depth + z
// Everything here is plain host math, so it is tested without a GPU.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::UVec3;
use std::io::Write;
use std::path::Path;

/// One RGBA voxel as written by the compute shader (std140 vec4)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Pixel {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// Dimensions of the rendered volume, in voxels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeExtent {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl VolumeExtent {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self { width, height, depth }
    }

    pub fn as_uvec3(&self) -> UVec3 {
        UVec3::new(self.width, self.height, self.depth)
    }

    pub fn voxel_count(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
    }

    /// Size of the pixel buffer in bytes
    pub fn byte_size(&self) -> vk::DeviceSize {
        self.voxel_count() * std::mem::size_of::<Pixel>() as vk::DeviceSize
    }

    /// Linear index of voxel (x, y, z); must match the shader
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        ((x as usize * self.height as usize) + y as usize) * self.depth as usize + z as usize
    }
}

/// Workgroups needed to cover `extent` with cubic groups of `workgroup_size`
pub fn dispatch_groups(extent: VolumeExtent, workgroup_size: u32) -> UVec3 {
    let size = UVec3::splat(workgroup_size);
    (extent.as_uvec3() + size - UVec3::ONE) / size
}

/// Check the volume against what the physical device can actually run
pub fn check_device_limits(
    extent: VolumeExtent,
    workgroup_size: u32,
    limits: &vk::PhysicalDeviceLimits,
) -> Result<()> {
    let size = extent.byte_size();
    if size > limits.max_storage_buffer_range as vk::DeviceSize {
        anyhow::bail!(
            "Volume of {} bytes exceeds maxStorageBufferRange ({} bytes)",
            size,
            limits.max_storage_buffer_range
        );
    }

    if limits
        .max_compute_work_group_size
        .iter()
        .any(|&max| workgroup_size > max)
    {
        anyhow::bail!(
            "Workgroup size {} exceeds maxComputeWorkGroupSize {:?}",
            workgroup_size,
            limits.max_compute_work_group_size
        );
    }

    let invocations = workgroup_size as u64 * workgroup_size as u64 * workgroup_size as u64;
    if invocations > limits.max_compute_work_group_invocations as u64 {
        anyhow::bail!(
            "Workgroup of {} invocations exceeds maxComputeWorkGroupInvocations ({})",
            invocations,
            limits.max_compute_work_group_invocations
        );
    }

    let groups = dispatch_groups(extent, workgroup_size);
    let max_groups = UVec3::from_array(limits.max_compute_work_group_count);
    if groups.cmpgt(max_groups).any() {
        anyhow::bail!(
            "Dispatch of {:?} groups exceeds maxComputeWorkGroupCount {:?}",
            groups.to_array(),
            limits.max_compute_work_group_count
        );
    }

    Ok(())
}

/// Summary of the scalar (r) channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeStats {
    pub min: f32,
    pub mean: f64,
    pub max: f32,
}

/// Read-only view of the mapped pixel buffer
#[derive(Debug, Clone, Copy)]
pub struct VolumeView<'a> {
    pixels: &'a [Pixel],
    extent: VolumeExtent,
}

impl<'a> VolumeView<'a> {
    pub fn new(pixels: &'a [Pixel], extent: VolumeExtent) -> Result<Self> {
        if extent.voxel_count() == 0 {
            anyhow::bail!(
                "Empty volume {}x{}x{}",
                extent.width,
                extent.height,
                extent.depth
            );
        }
        if pixels.len() as u64 != extent.voxel_count() {
            anyhow::bail!(
                "Pixel count {} does not match a {}x{}x{} volume",
                pixels.len(),
                extent.width,
                extent.height,
                extent.depth
            );
        }
        Ok(Self { pixels, extent })
    }

    /// View raw mapped bytes as pixels
    pub fn from_bytes(bytes: &'a [u8], extent: VolumeExtent) -> Result<Self> {
        let pixels = bytemuck::try_cast_slice::<u8, Pixel>(bytes)
            .map_err(|e| anyhow::anyhow!("Mapped memory is not a pixel array: {:?}", e))?;
        Self::new(pixels, extent)
    }

    pub fn extent(&self) -> VolumeExtent {
        self.extent
    }

    pub fn pixels(&self) -> &'a [Pixel] {
        self.pixels
    }

    pub fn get(&self, x: u32, y: u32, z: u32) -> Option<&'a Pixel> {
        let e = self.extent;
        if x >= e.width || y >= e.height || z >= e.depth {
            return None;
        }
        self.pixels.get(e.index(x, y, z))
    }

    pub fn scalar_channel(&self) -> impl Iterator<Item = f32> + 'a {
        self.pixels.iter().map(|p| p.r)
    }

    pub fn statistics(&self) -> VolumeStats {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        for v in self.scalar_channel() {
            min = min.min(v);
            max = max.max(v);
            sum += v as f64;
        }
        VolumeStats {
            min,
            mean: sum / self.pixels.len() as f64,
            max,
        }
    }

    /// Write the scalar channel as native-endian f32, in buffer order
    pub fn write_scalar_raw<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {:?}", path))?;
        let mut writer = std::io::BufWriter::new(file);

        let scalars: Vec<f32> = self.scalar_channel().collect();
        writer
            .write_all(bytemuck::cast_slice(&scalars))
            .and_then(|_| writer.flush())
            .with_context(|| format!("Failed to write {:?}", path))?;

        log::info!(
            "Wrote {}x{}x{} f32 scalar volume to {:?}",
            self.extent.width,
            self.extent.height,
            self.extent.depth,
            path
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(r: f32) -> Pixel {
        Pixel { r, g: 0.0, b: 0.0, a: 1.0 }
    }

    #[test]
    fn pixel_is_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<Pixel>(), 16);
    }

    #[test]
    fn byte_size_does_not_truncate() {
        let extent = VolumeExtent::new(1024, 1024, 1024);
        assert_eq!(extent.byte_size(), 16 * 1024 * 1024 * 1024);
    }

    #[test]
    fn dispatch_rounds_up() {
        let groups = dispatch_groups(VolumeExtent::new(512, 9, 1), 8);
        assert_eq!(groups, UVec3::new(64, 2, 1));
    }

    #[test]
    fn index_is_x_major() {
        let extent = VolumeExtent::new(2, 3, 4);
        assert_eq!(extent.index(0, 0, 1), 1);
        assert_eq!(extent.index(0, 1, 0), 4);
        assert_eq!(extent.index(1, 0, 0), 12);
        assert_eq!(extent.index(1, 2, 3), 23);
    }

    #[test]
    fn view_rejects_wrong_length() {
        let pixels = vec![Pixel::default(); 7];
        assert!(VolumeView::new(&pixels, VolumeExtent::new(2, 2, 2)).is_err());
    }

    #[test]
    fn view_rejects_empty_volume() {
        let err = VolumeView::new(&[], VolumeExtent::new(0, 4, 4)).unwrap_err();
        assert!(err.to_string().contains("Empty volume"));
    }

    #[test]
    fn get_follows_index_and_bounds() {
        let extent = VolumeExtent::new(2, 2, 2);
        let pixels: Vec<Pixel> = (0..8).map(|i| pixel(i as f32)).collect();
        let view = VolumeView::new(&pixels, extent).unwrap();

        assert_eq!(view.get(1, 0, 1).map(|p| p.r), Some(5.0));
        assert_eq!(view.get(2, 0, 0), None);
    }

    #[test]
    fn statistics_over_scalar_channel() {
        let pixels = vec![pixel(0.25), pixel(1.0), pixel(0.0), pixel(0.75)];
        let view = VolumeView::new(&pixels, VolumeExtent::new(1, 2, 2)).unwrap();
        let stats = view.statistics();

        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 1.0);
        assert!((stats.mean - 0.5).abs() < 1e-12);
    }

    #[test]
    fn from_bytes_reads_pixels() {
        let pixels = vec![pixel(0.5), pixel(2.0)];
        let bytes: &[u8] = bytemuck::cast_slice(&pixels);
        let view = VolumeView::from_bytes(bytes, VolumeExtent::new(1, 1, 2)).unwrap();
        assert_eq!(view.pixels(), &pixels[..]);
    }

    #[test]
    fn limits_reject_oversized_buffer() {
        let limits = vk::PhysicalDeviceLimits {
            max_storage_buffer_range: 1 << 27,
            max_compute_work_group_size: [1024, 1024, 64],
            max_compute_work_group_invocations: 1024,
            max_compute_work_group_count: [65535, 65535, 65535],
            ..Default::default()
        };

        check_device_limits(VolumeExtent::new(128, 128, 128), 8, &limits).unwrap();

        let err = check_device_limits(VolumeExtent::new(512, 512, 512), 8, &limits).unwrap_err();
        assert!(err.to_string().contains("maxStorageBufferRange"));
    }

    #[test]
    fn limits_reject_large_workgroups() {
        let limits = vk::PhysicalDeviceLimits {
            max_storage_buffer_range: u32::MAX,
            max_compute_work_group_size: [1024, 1024, 64],
            max_compute_work_group_invocations: 1024,
            max_compute_work_group_count: [65535, 65535, 65535],
            ..Default::default()
        };

        let err = check_device_limits(VolumeExtent::new(64, 64, 64), 16, &limits).unwrap_err();
        assert!(err.to_string().contains("maxComputeWorkGroupInvocations"));

        let err = check_device_limits(VolumeExtent::new(64, 64, 64), 128, &limits).unwrap_err();
        assert!(err.to_string().contains("maxComputeWorkGroupSize"));
    }

    #[test]
    fn limits_reject_too_many_groups() {
        let limits = vk::PhysicalDeviceLimits {
            max_storage_buffer_range: u32::MAX,
            max_compute_work_group_size: [1024, 1024, 64],
            max_compute_work_group_invocations: 1024,
            max_compute_work_group_count: [65535, 65535, 16],
            ..Default::default()
        };

        // 16 groups along z is exactly the limit
        check_device_limits(VolumeExtent::new(8, 8, 128), 8, &limits).unwrap();

        let err = check_device_limits(VolumeExtent::new(8, 8, 129), 8, &limits).unwrap_err();
        assert!(err.to_string().contains("maxComputeWorkGroupCount"));
    }

    #[test]
    fn raw_export_writes_scalar_channel() {
        let pixels = vec![pixel(1.0), pixel(-2.5)];
        let view = VolumeView::new(&pixels, VolumeExtent::new(2, 1, 1)).unwrap();

        let path = std::env::temp_dir().join(format!("vudo-raw-{}.raw", std::process::id()));
        view.write_scalar_raw(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(values, vec![1.0, -2.5]);
    }
}
