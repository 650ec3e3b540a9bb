// Descriptor set for the single storage buffer
//
// Matches `layout(std140, binding = 0) buffer Volume` in the compute shader.

use anyhow::{Context, Result};
use ash::vk;
use super::VulkanDevice;

/// Binding 0: one storage buffer, visible to the compute stage
pub fn create_storage_set_layout(device: &VulkanDevice) -> Result<vk::DescriptorSetLayout> {
    let binding = vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::COMPUTE)
        .build();

    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
        .bindings(std::slice::from_ref(&binding));

    unsafe {
        device.device.create_descriptor_set_layout(&layout_info, None)
            .context("Failed to create descriptor set layout")
    }
}

pub struct StorageDescriptor {
    pub layout: vk::DescriptorSetLayout,
    pub pool: vk::DescriptorPool,
    pub set: vk::DescriptorSet,
}

impl StorageDescriptor {
    /// Allocate one set from a dedicated pool and point it at `buffer`
    pub fn new(
        device: &VulkanDevice,
        layout: vk::DescriptorSetLayout,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    ) -> Result<Self> {
        let pool_size = vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(1)
            .build();

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(1)
            .pool_sizes(std::slice::from_ref(&pool_size));

        let pool = unsafe {
            device.device.create_descriptor_pool(&pool_info, None)
                .context("Failed to create descriptor pool")?
        };

        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let set = match unsafe { device.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets[0],
            Err(e) => {
                unsafe { device.device.destroy_descriptor_pool(pool, None) };
                return Err(e).context("Failed to allocate descriptor set");
            }
        };

        let buffer_info = vk::DescriptorBufferInfo::builder()
            .buffer(buffer)
            .offset(0)
            .range(range)
            .build();

        // Write to the first, and only, binding
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(std::slice::from_ref(&buffer_info))
            .build();

        unsafe { device.device.update_descriptor_sets(&[write], &[]) };

        Ok(Self { layout, pool, set })
    }

    /// Destroys the pool (freeing the set) and then the layout
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_descriptor_pool(self.pool, None);
            device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}
