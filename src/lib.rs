//! Headless Vulkan compute: render a volumetric mandelbulb on the GPU and
//! read the voxels back through a host-visible mapping.

pub mod backend;
pub mod compute;
pub mod config;
pub mod volume;

pub use compute::MandelbrotCompute;
pub use config::Config;
pub use volume::{Pixel, VolumeExtent, VolumeStats, VolumeView};
