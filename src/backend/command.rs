// Command pool and the one recorded dispatch

use anyhow::{Context, Result};
use ash::vk;
use glam::UVec3;
use super::pipeline::{ComputePipeline, RenderParams};
use super::VulkanDevice;

pub struct CommandRecorder {
    pub pool: vk::CommandPool,
}

impl CommandRecorder {
    /// Command pool on the compute queue family
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.compute_queue_family);

        let pool = unsafe {
            device.device.create_command_pool(&pool_info, None)
                .context("Failed to create command pool")?
        };

        Ok(Self { pool })
    }

    /// Record bind + push constants + dispatch into a fresh primary buffer.
    ///
    /// A buffer barrier at the end makes the shader writes visible to host
    /// reads once the fence signals.
    pub fn record_dispatch(
        &self,
        device: &ash::Device,
        pipeline: &ComputePipeline,
        descriptor_set: vk::DescriptorSet,
        params: &RenderParams,
        groups: UVec3,
        buffer: vk::Buffer,
    ) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let cmd = unsafe {
            device.allocate_command_buffers(&alloc_info)
                .context("Failed to allocate command buffer")?[0]
        };

        unsafe {
            // ─────────────────────────────────────────────────────────────
            // Begin recording
            // ─────────────────────────────────────────────────────────────
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin command buffer")?;

            // ─────────────────────────────────────────────────────────────
            // Pipeline, storage buffer, parameters
            // ─────────────────────────────────────────────────────────────
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.layout,
                0,
                &[descriptor_set],
                &[],
            );
            device.cmd_push_constants(
                cmd,
                pipeline.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(params),
            );

            // ─────────────────────────────────────────────────────────────
            // DISPATCH: one invocation per voxel, rounded up to whole groups
            // ─────────────────────────────────────────────────────────────
            device.cmd_dispatch(cmd, groups.x, groups.y, groups.z);

            // ─────────────────────────────────────────────────────────────
            // SHADER WRITE -> HOST READ
            // ─────────────────────────────────────────────────────────────
            let barrier = vk::BufferMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::SHADER_WRITE)
                .dst_access_mask(vk::AccessFlags::HOST_READ)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(buffer)
                .offset(0)
                .size(vk::WHOLE_SIZE)
                .build();

            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );

            // ─────────────────────────────────────────────────────────────
            // End recording
            // ─────────────────────────────────────────────────────────────
            device.end_command_buffer(cmd)
                .context("Failed to end command buffer")?;
        }

        log::info!("Recorded dispatch of {:?} workgroups", groups.to_array());
        Ok(cmd)
    }

    /// Destroying the pool also frees its command buffers
    pub fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_command_pool(self.pool, None) };
    }
}
