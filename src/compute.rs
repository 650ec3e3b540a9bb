// =============================================================================
// MANDELBROT COMPUTE - one dispatch, start to finish
// =============================================================================
//
// SETUP ORDER (MandelbrotCompute::new):
//   device -> buffer -> descriptor set -> shader + pipeline -> command buffer
// RUN:
//   submit -> wait on fence
// READ:
//   host view over the persistently mapped buffer
// TEARDOWN (Drop):
//   the same steps in reverse; the instance goes last with the device
//
// Every resource is held in an Option so a failure halfway through setup
// still tears down exactly what was created.
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{
    descriptor, shader, sync, CommandRecorder, ComputePipeline, RenderParams, StorageBuffer,
    StorageDescriptor, VulkanDevice,
};
use crate::config::Config;
use crate::volume::{self, VolumeExtent, VolumeView};

pub struct MandelbrotCompute {
    extent: VolumeExtent,
    fence_timeout_ns: u64,
    command_buffer: vk::CommandBuffer,

    // Destroyed in reverse of this order
    commands: Option<CommandRecorder>,
    pipeline: Option<ComputePipeline>,
    shader_module: Option<vk::ShaderModule>,
    descriptor: Option<StorageDescriptor>,
    buffer: Option<StorageBuffer>,
    device: Arc<VulkanDevice>,
}

impl MandelbrotCompute {
    /// Run the whole setup sequence. Nothing is submitted yet.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        let extent = VolumeExtent::new(
            config.volume.width,
            config.volume.height,
            config.volume.depth,
        );
        let workgroup_size = config.volume.workgroup_size;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Instance, physical device, logical device
        // ─────────────────────────────────────────────────────────────────────
        let device = VulkanDevice::new("vudo", config.debug.validation_layers)?;
        volume::check_device_limits(extent, workgroup_size, device.limits())?;

        let mut compute = Self {
            extent,
            fence_timeout_ns: config.compute.fence_timeout_ns,
            command_buffer: vk::CommandBuffer::null(),
            commands: None,
            pipeline: None,
            shader_module: None,
            descriptor: None,
            buffer: None,
            device,
        };
        let device = compute.device.clone();

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Storage buffer the shader renders into
        // ─────────────────────────────────────────────────────────────────────
        let size = extent.byte_size();
        log::info!(
            "Volume {}x{}x{}: {} bytes",
            extent.width,
            extent.height,
            extent.depth,
            size
        );
        let buffer = compute.buffer.insert(StorageBuffer::new(&device, size, "volume")?);
        let buffer_handle = buffer.buffer;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Descriptor set layout + set pointing at the buffer
        // ─────────────────────────────────────────────────────────────────────
        let set_layout = descriptor::create_storage_set_layout(&device)?;
        let descriptor = match StorageDescriptor::new(&device, set_layout, buffer_handle, size) {
            Ok(descriptor) => compute.descriptor.insert(descriptor),
            Err(e) => {
                unsafe { device.device.destroy_descriptor_set_layout(set_layout, None) };
                return Err(e);
            }
        };
        let descriptor_set = descriptor.set;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Shader module + compute pipeline
        // ─────────────────────────────────────────────────────────────────────
        log::info!("Loading shader {:?}", config.shader.path);
        let code = shader::load_spirv(&config.shader.path)?;
        let module = *compute
            .shader_module
            .insert(shader::create_shader_module(&device, &code)?);

        let pipeline = compute.pipeline.insert(ComputePipeline::new(
            &device,
            module,
            &config.shader.entry_point,
            set_layout,
            workgroup_size,
        )?);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Command pool + the recorded dispatch
        // ─────────────────────────────────────────────────────────────────────
        let params = RenderParams::new(extent, &config.fractal);
        let groups = volume::dispatch_groups(extent, workgroup_size);

        let commands = CommandRecorder::new(&device)?;
        let recorded = commands.record_dispatch(
            &device.device,
            pipeline,
            descriptor_set,
            &params,
            groups,
            buffer_handle,
        );
        compute.commands = Some(commands);
        compute.command_buffer = recorded?;

        log::info!("Compute setup complete");
        Ok(compute)
    }

    /// Submit the recorded dispatch and block until the GPU is done.
    ///
    /// The command buffer is one-time-submit, so only the first call runs;
    /// later calls fail.
    pub fn run(&mut self) -> Result<Duration> {
        let cmd = std::mem::replace(&mut self.command_buffer, vk::CommandBuffer::null());
        if cmd == vk::CommandBuffer::null() {
            anyhow::bail!("No command buffer recorded");
        }
        sync::submit_and_wait(&self.device, cmd, self.fence_timeout_ns)
    }

    /// The rendered volume, read straight from the mapped buffer
    pub fn rendered(&self) -> Result<VolumeView<'_>> {
        let buffer = self.buffer.as_ref()
            .context("Volume buffer not allocated")?;
        VolumeView::from_bytes(buffer.mapped_bytes()?, self.extent)
    }

    pub fn extent(&self) -> VolumeExtent {
        self.extent
    }

    pub fn buffer_size(&self) -> vk::DeviceSize {
        self.extent.byte_size()
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for MandelbrotCompute {
    fn drop(&mut self) {
        log::info!("Cleaning up compute resources...");

        // Wait for GPU to finish before destroying anything
        let _ = self.device.wait_idle();

        let device = &self.device.device;

        // 1. Command pool (also frees the command buffer)
        if let Some(commands) = self.commands.take() {
            commands.destroy(device);
        }

        // 2. Pipeline + layout
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.destroy(device);
        }

        // 3. Shader module
        if let Some(module) = self.shader_module.take() {
            unsafe { device.destroy_shader_module(module, None) };
        }

        // 4. Descriptor pool + set layout
        if let Some(descriptor) = self.descriptor.take() {
            descriptor.destroy(device);
        }

        // 5. Buffer + memory
        if let Some(mut buffer) = self.buffer.take() {
            buffer.destroy(&self.device);
        }

        // 6. Device and instance go when the last Arc drops

        log::info!("Cleanup complete");
    }
}
