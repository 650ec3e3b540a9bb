// Backend module - Vulkan abstractions
pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod sync;

pub use buffer::StorageBuffer;
pub use command::CommandRecorder;
pub use descriptor::StorageDescriptor;
pub use device::VulkanDevice;
pub use pipeline::{ComputePipeline, RenderParams};
