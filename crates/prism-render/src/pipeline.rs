//! Graphics pipeline construction and caching.

use crate::error::{RenderError, Result};
use crate::passes::RenderPassDefinition;
use ash::vk;
use prism_asset::{ResourceCache, Vertex};
use prism_gpu::GpuError;
use std::collections::HashMap;

fn collect_color_formats(pass: &RenderPassDefinition, swapchain_name: &str, swapchain_format: vk::Format) -> Vec<vk::Format> {
    pass.resources
        .color_outputs
        .iter()
        .map(|attachment| {
            // The swapchain attachment may leave its format undeclared.
            if attachment.resource_name == swapchain_name && attachment.format == vk::Format::UNDEFINED
            {
                swapchain_format
            } else {
                attachment.format
            }
        })
        .collect()
}

fn collect_depth_format(pass: &RenderPassDefinition) -> Option<vk::Format> {
    pass.resources
        .depth_stencil_output
        .as_ref()
        .map(|attachment| attachment.format)
}

/// Builder for the engine's default dynamic-rendering pipelines.
///
/// Shader stages come from the resource cache's program for the configured
/// prefix; the vertex input is the engine's fixed [`Vertex`] layout.
pub struct GraphicsPipelineBuilder<'a> {
    device: &'a ash::Device,
    resources: &'a ResourceCache,

    shader_prefix: String,
    pipeline_layout: vk::PipelineLayout,
    color_formats: Vec<vk::Format>,
    depth_format: Option<vk::Format>,

    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,

    depth_test: bool,
    depth_write: bool,
    depth_compare_op: vk::CompareOp,

    enable_blend: bool,
}

impl<'a> GraphicsPipelineBuilder<'a> {
    pub fn new(device: &'a ash::Device, resources: &'a ResourceCache) -> Self {
        Self {
            device,
            resources,
            shader_prefix: String::new(),
            pipeline_layout: vk::PipelineLayout::null(),
            color_formats: Vec::new(),
            depth_format: None,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            depth_compare_op: vk::CompareOp::LESS,
            enable_blend: false,
        }
    }

    pub fn shader_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.shader_prefix = prefix.into();
        self
    }

    pub fn pipeline_layout(mut self, layout: vk::PipelineLayout) -> Self {
        self.pipeline_layout = layout;
        self
    }

    pub fn render_targets(
        mut self,
        color_formats: Vec<vk::Format>,
        depth_format: Option<vk::Format>,
    ) -> Self {
        self.color_formats = color_formats;
        self.depth_format = depth_format;
        self
    }

    pub fn rasterization(
        mut self,
        polygon_mode: vk::PolygonMode,
        cull_mode: vk::CullModeFlags,
        front_face: vk::FrontFace,
    ) -> Self {
        self.polygon_mode = polygon_mode;
        self.cull_mode = cull_mode;
        self.front_face = front_face;
        self
    }

    pub fn depth_state(mut self, test: bool, write: bool, compare_op: vk::CompareOp) -> Self {
        self.depth_test = test;
        self.depth_write = write;
        self.depth_compare_op = compare_op;
        self
    }

    pub fn color_blend(mut self, enable: bool) -> Self {
        self.enable_blend = enable;
        self
    }

    /// Create the pipeline layout from the schemas registered under the
    /// shader prefix.
    pub fn build_pipeline_layout(&self) -> Result<vk::PipelineLayout> {
        let schemas = self.resources.shader_schemas(&self.shader_prefix);
        let layouts: Vec<vk::DescriptorSetLayout> = schemas.iter().map(|s| s.layout()).collect();

        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&layouts);
        let layout = unsafe {
            self.device
                .create_pipeline_layout(&layout_info, None)
                .map_err(|e| GpuError::PipelineCreation(e.to_string()))?
        };
        Ok(layout)
    }

    /// Build the graphics pipeline. The caller owns the returned handle.
    pub fn build(&self) -> Result<vk::Pipeline> {
        if self.shader_prefix.is_empty() {
            return Err(RenderError::InvalidArgument(
                "pipeline builder requires a shader prefix".to_string(),
            ));
        }
        if self.color_formats.is_empty() {
            return Err(RenderError::InvalidArgument(
                "pipeline builder requires at least one color format".to_string(),
            ));
        }
        if self.pipeline_layout == vk::PipelineLayout::null() {
            return Err(RenderError::InvalidArgument(
                "pipeline builder requires a pipeline layout".to_string(),
            ));
        }

        let program = self
            .resources
            .shader_program(&self.shader_prefix)
            .ok_or_else(|| {
                GpuError::PipelineCreation(format!(
                    "shader program '{}' is not loaded",
                    self.shader_prefix
                ))
            })?;

        let mut stages = Vec::new();
        if let Some(vertex) = &program.vertex {
            stages.push(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::VERTEX)
                    .module(vertex.handle())
                    .name(c"main"),
            );
        }
        if let Some(fragment) = &program.fragment {
            stages.push(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(fragment.handle())
                    .name(c"main"),
            );
        }
        if stages.is_empty() {
            return Err(RenderError::Gpu(GpuError::PipelineCreation(format!(
                "shader program '{}' has no graphics stages",
                self.shader_prefix
            ))));
        }

        let vertex_bindings = [Vertex::binding_description()];
        let vertex_attributes = Vertex::attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_write)
            .depth_compare_op(self.depth_compare_op)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let mut blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(self.enable_blend)
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        if self.enable_blend {
            blend_attachment = blend_attachment
                .color_blend_op(vk::BlendOp::ADD)
                .alpha_blend_op(vk::BlendOp::ADD)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
        }
        let blend_attachments = vec![blend_attachment; self.color_formats.len()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&self.color_formats);
        if let Some(depth_format) = self.depth_format {
            rendering_info = rendering_info.depth_attachment_format(depth_format);
        }

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(self.pipeline_layout)
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| GpuError::PipelineCreation(e.to_string()))?
        };
        Ok(pipelines[0])
    }
}

/// Cache key for a default pipeline: shader prefix plus output formats.
fn pipeline_key(
    shader_prefix: &str,
    color_formats: &[vk::Format],
    depth_format: Option<vk::Format>,
) -> String {
    let mut key = format!("{shader_prefix}|C");
    for format in color_formats {
        key.push_str(&format!(":{}", format.as_raw()));
    }
    key.push_str("|D:");
    match depth_format {
        Some(format) => key.push_str(&format.as_raw().to_string()),
        None => key.push_str("None"),
    }
    key
}

/// Owns and caches pipeline layouts (by shader prefix) and default pipelines
/// (by prefix + output formats). Reused across frames and resizes.
pub struct PipelineLibrary {
    device: ash::Device,
    resources: ResourceCache,
    layouts: HashMap<String, vk::PipelineLayout>,
    pipelines: HashMap<String, vk::Pipeline>,
}

impl PipelineLibrary {
    pub fn new(device: &ash::Device, resources: ResourceCache) -> Self {
        Self {
            device: device.clone(),
            resources,
            layouts: HashMap::new(),
            pipelines: HashMap::new(),
        }
    }

    /// Get or create the pipeline layout for a shader prefix.
    pub fn get_or_create_layout(&mut self, shader_prefix: &str) -> Result<vk::PipelineLayout> {
        if let Some(&layout) = self.layouts.get(shader_prefix) {
            return Ok(layout);
        }

        let layout = GraphicsPipelineBuilder::new(&self.device, &self.resources)
            .shader_prefix(shader_prefix)
            .build_pipeline_layout()?;
        self.layouts.insert(shader_prefix.to_string(), layout);
        Ok(layout)
    }

    /// Get or create the default pipeline for a pass's output formats.
    pub fn get_or_create_default_pipeline(
        &mut self,
        shader_prefix: &str,
        pass: &RenderPassDefinition,
        swapchain_name: &str,
        swapchain_format: vk::Format,
    ) -> Result<vk::Pipeline> {
        let color_formats = collect_color_formats(pass, swapchain_name, swapchain_format);
        let depth_format = collect_depth_format(pass);
        let key = pipeline_key(shader_prefix, &color_formats, depth_format);

        if let Some(&pipeline) = self.pipelines.get(&key) {
            return Ok(pipeline);
        }

        let layout = self.get_or_create_layout(shader_prefix)?;
        let pipeline = GraphicsPipelineBuilder::new(&self.device, &self.resources)
            .shader_prefix(shader_prefix)
            .pipeline_layout(layout)
            .render_targets(color_formats, depth_format)
            .build()?;

        self.pipelines.insert(key, pipeline);
        Ok(pipeline)
    }
}

impl Drop for PipelineLibrary {
    fn drop(&mut self) {
        unsafe {
            for (_, pipeline) in self.pipelines.drain() {
                self.device.destroy_pipeline(pipeline, None);
            }
            for (_, layout) in self.layouts.drain() {
                self.device.destroy_pipeline_layout(layout, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::{AttachmentType, RenderAttachment, RenderPassIo};

    #[test]
    fn pipeline_key_covers_formats() {
        let key = pipeline_key(
            "forward",
            &[vk::Format::B8G8R8A8_SRGB, vk::Format::R16G16B16A16_SFLOAT],
            Some(vk::Format::D32_SFLOAT),
        );
        assert!(key.starts_with("forward|C:"));
        assert!(key.contains(&vk::Format::B8G8R8A8_SRGB.as_raw().to_string()));
        assert!(key.ends_with(&vk::Format::D32_SFLOAT.as_raw().to_string()));

        let no_depth = pipeline_key("forward", &[vk::Format::B8G8R8A8_SRGB], None);
        assert!(no_depth.ends_with("|D:None"));
        assert_ne!(key, no_depth);
    }

    #[test]
    fn swapchain_attachment_borrows_the_swapchain_format() {
        let pass = RenderPassDefinition {
            name: "forward".to_string(),
            shader_prefix: "forward".to_string(),
            resources: RenderPassIo {
                color_outputs: vec![RenderAttachment {
                    attachment_type: AttachmentType::Color,
                    resource_name: "Swapchain".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            },
            render_extent: vk::Extent2D::default(),
        };

        let formats = collect_color_formats(&pass, "Swapchain", vk::Format::B8G8R8A8_SRGB);
        assert_eq!(formats, vec![vk::Format::B8G8R8A8_SRGB]);
    }
}
