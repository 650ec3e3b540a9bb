// Storage buffer the compute shader writes and the host reads back
//
// Memory comes from gpu-allocator with `GpuToCpu`, which picks a
// HOST_VISIBLE type (coherent and cached when the device has one), so the
// allocation stays persistently mapped for the whole run.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use super::VulkanDevice;

pub struct StorageBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
}

impl StorageBuffer {
    /// Create a host-readable storage buffer of `size` bytes
    pub fn new(device: &VulkanDevice, size: vk::DeviceSize, name: &str) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk::BufferUsageFlags::STORAGE_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device.device.create_buffer(&buffer_info, None)
                .context("Failed to create buffer")?
        };

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator.lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuToCpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e).context("Failed to allocate buffer memory");
            }
        };

        let bound = unsafe {
            device.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            unsafe { device.device.destroy_buffer(buffer, None) };
            let _ = device.allocator.lock().free(allocation);
            return Err(e).context("Failed to bind buffer memory");
        }

        log::info!(
            "Allocated {} ({} bytes, memory offset {})",
            name,
            size,
            allocation.offset()
        );

        Ok(Self {
            buffer,
            size,
            allocation: Some(allocation),
        })
    }

    /// The mapped contents, exactly `size` bytes
    pub fn mapped_bytes(&self) -> Result<&[u8]> {
        let allocation = self.allocation.as_ref()
            .context("Buffer memory already freed")?;
        let bytes = allocation.mapped_slice()
            .context("Buffer memory is not host visible")?;
        bytes.get(..self.size as usize)
            .context("Mapped range is smaller than the buffer")
    }

    pub fn destroy(&mut self, device: &VulkanDevice) {
        if let Some(allocation) = self.allocation.take() {
            unsafe { device.device.destroy_buffer(self.buffer, None) };
            if let Err(e) = device.allocator.lock().free(allocation) {
                log::error!("Failed to free buffer memory: {}", e);
            }
        }
    }
}
