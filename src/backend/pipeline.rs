// Compute pipeline creation
//
// One shader stage, one descriptor set layout, one push constant block.
// The workgroup size is baked in through specialization constants 0..2
// (`local_size_{x,y,z}_id` in the shader).

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::ffi::CString;
use super::VulkanDevice;
use crate::config::FractalConfig;
use crate::volume::VolumeExtent;

/// Push constant block, laid out like `RenderParams` in the shader
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RenderParams {
    /// width, height, depth, max_iterations
    pub dims: [u32; 4],
    /// centre xyz, half extent
    pub region: [f32; 4],
    /// power, bailout, unused, unused
    pub fractal: [f32; 4],
}

impl RenderParams {
    pub fn new(extent: VolumeExtent, fractal: &FractalConfig) -> Self {
        let [cx, cy, cz] = fractal.center;
        Self {
            dims: [extent.width, extent.height, extent.depth, fractal.max_iterations],
            region: [cx, cy, cz, fractal.half_extent],
            fractal: [fractal.power, fractal.bailout, 0.0, 0.0],
        }
    }
}

pub struct ComputePipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl ComputePipeline {
    pub fn new(
        device: &VulkanDevice,
        shader: vk::ShaderModule,
        entry_point: &str,
        set_layout: vk::DescriptorSetLayout,
        workgroup_size: u32,
    ) -> Result<Self> {
        let entry_point = CString::new(entry_point)
            .context("Shader entry point contains a NUL byte")?;

        // Specialization constants: local_size_x/y/z
        let spec_data = [workgroup_size; 3];
        let spec_entries: Vec<vk::SpecializationMapEntry> = (0..3u32)
            .map(|id| vk::SpecializationMapEntry {
                constant_id: id,
                offset: id * std::mem::size_of::<u32>() as u32,
                size: std::mem::size_of::<u32>(),
            })
            .collect();
        let spec_info = vk::SpecializationInfo::builder()
            .map_entries(&spec_entries)
            .data(bytemuck::cast_slice(&spec_data));

        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader)
            .name(&entry_point)
            .specialization_info(&spec_info)
            .build();

        let push_constant_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(std::mem::size_of::<RenderParams>() as u32)
            .build();

        // Pipeline layout: the storage buffer set + push constants
        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(std::slice::from_ref(&push_constant_range));

        let layout = unsafe {
            device.device.create_pipeline_layout(&layout_info, None)
                .context("Failed to create pipeline layout")?
        };

        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(layout)
            .build();

        let pipelines = unsafe {
            device.device.create_compute_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        };

        let pipelines = match pipelines {
            Ok(pipelines) => pipelines,
            Err((_, e)) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                return Err(e).context("Failed to create compute pipeline");
            }
        };

        Ok(Self {
            pipeline: pipelines[0],
            layout,
        })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
