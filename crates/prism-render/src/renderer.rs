//! Frame orchestration.
//!
//! The renderer consumes a declarative pass sequence. Per frame it uploads
//! the scene's camera/light uniforms, then walks the passes in order:
//! resolve attachment names, issue the swapchain and depth barriers, begin
//! dynamic rendering, and hand the command buffer to the pass's registered
//! draw callback.

use crate::error::{RenderError, Result};
use crate::passes::{RenderPassDefinition, RenderPassSequence};
use crate::pipeline::PipelineLibrary;
use crate::resources::{
    FrameResourceDefinition, FrameResourceService, PerFrameGpuResources, RendererGlobalResources,
};
use ash::vk;
use parking_lot::RwLock;
use prism_asset::{MaterialManager, ResourceCache, Scene};
use prism_gpu::{
    barrier, GpuContext, ImageLayoutTransition, ManagedImage, TransferEngine,
};
use std::collections::HashMap;
use std::sync::Arc;

/// The swapchain images the renderer currently records against. The app
/// layer hands a fresh target over after every swapchain (re)creation.
#[derive(Clone, Default)]
pub struct SwapchainTarget {
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Renderer configuration.
#[derive(Clone)]
pub struct RendererConfig {
    /// Meshes, textures, and shaders preloaded at construction.
    pub global_resources: RendererGlobalResources,
    /// Per-frame uniform buffers and descriptor sets.
    pub frame_definition: FrameResourceDefinition,
    /// The declarative pass list.
    pub render_passes: RenderPassSequence,
    /// Reserved attachment name that binds the swapchain image.
    pub swapchain_attachment_name: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            global_resources: RendererGlobalResources::default(),
            frame_definition: FrameResourceDefinition::default(),
            render_passes: RenderPassSequence::default(),
            swapchain_attachment_name: "Swapchain".to_string(),
        }
    }
}

/// Everything a pass draw callback gets to work with.
pub struct PassDrawContext<'a> {
    pub cmd: vk::CommandBuffer,
    /// Frame slot index (frame number modulo frames in flight).
    pub frame_index: u32,
    pub pipeline_layout: vk::PipelineLayout,
    pub frame_resources: &'a PerFrameGpuResources,
    pub scene: &'a Scene,
    pub resources: &'a ResourceCache,
    pub materials: Option<&'a MaterialManager>,
}

/// Draw callback for one pass. The callback writes descriptors, binds
/// vertex/index buffers, and issues draws; everything around it is set up
/// by the renderer.
pub type PassDrawCallback = Box<dyn Fn(&RenderPassDefinition, &PassDrawContext) + Send>;

struct PassRuntime {
    pass: RenderPassDefinition,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    /// Depth targets get a single Undefined → DepthStencilAttachmentOptimal
    /// transition on first use.
    depth_initialized: bool,
}

/// Frame orchestrator. Single-threaded: one `Renderer` records on the
/// render thread while asset loads happen elsewhere.
pub struct Renderer {
    device: ash::Device,
    service: FrameResourceService,
    resources: ResourceCache,
    materials: Option<Arc<MaterialManager>>,
    scene: Arc<RwLock<Scene>>,

    pipeline_library: PipelineLibrary,
    config: RendererConfig,

    frame_resources: Vec<PerFrameGpuResources>,
    pass_runtimes: Vec<PassRuntime>,
    callbacks: HashMap<String, PassDrawCallback>,
    render_targets: HashMap<String, ManagedImage>,

    swapchain: SwapchainTarget,
    render_extent: vk::Extent2D,
}

impl Renderer {
    /// Build the renderer: preload global resources, allocate per-frame
    /// resources, and construct each pass's pipeline and layout.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: &GpuContext,
        transfer: Arc<TransferEngine>,
        resources: ResourceCache,
        materials: Option<Arc<MaterialManager>>,
        scene: Arc<RwLock<Scene>>,
        swapchain: SwapchainTarget,
        config: RendererConfig,
    ) -> Result<Self> {
        if config.frame_definition.frames_in_flight == 0 {
            return Err(RenderError::InvalidArgument(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }

        let service = FrameResourceService::new(
            resources.clone(),
            transfer,
            ctx.allocator().clone(),
            ctx.device(),
        );
        service.preload_global_resources(&config.global_resources)?;

        let mut frame_resources = Vec::with_capacity(config.frame_definition.frames_in_flight as usize);
        for _ in 0..config.frame_definition.frames_in_flight {
            frame_resources.push(service.create_per_frame_resources(&config.frame_definition)?);
        }

        let render_extent = swapchain.extent;
        let mut renderer = Self {
            device: ctx.device().clone(),
            service,
            resources: resources.clone(),
            materials,
            scene,
            pipeline_library: PipelineLibrary::new(ctx.device(), resources),
            config,
            frame_resources,
            pass_runtimes: Vec::new(),
            callbacks: HashMap::new(),
            render_targets: HashMap::new(),
            swapchain,
            render_extent,
        };
        renderer.build_pass_runtimes()?;

        tracing::info!(
            "Renderer ready: {} passes, {} frames in flight",
            renderer.pass_runtimes.len(),
            renderer.frame_resources.len()
        );
        Ok(renderer)
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn frame_resources(&self) -> &[PerFrameGpuResources] {
        &self.frame_resources
    }

    pub fn frame_service(&self) -> &FrameResourceService {
        &self.service
    }

    /// Register the draw callback for a pass. A pass without a callback
    /// still runs its attachment setup but issues no draws.
    pub fn register_pass_callback(&mut self, pass_name: impl Into<String>, callback: PassDrawCallback) {
        self.callbacks.insert(pass_name.into(), callback);
    }

    /// Register an offscreen image under an attachment name.
    pub fn register_render_target(&mut self, name: impl Into<String>, image: ManagedImage) {
        self.render_targets.insert(name.into(), image);
    }

    /// Adopt a recreated swapchain and rebuild pass pipelines against its
    /// format. The caller has already waited for the device to go idle.
    pub fn on_resize(&mut self, target: SwapchainTarget) -> Result<()> {
        self.render_extent = target.extent;
        self.swapchain = target;
        self.build_pass_runtimes()
    }

    /// Record one frame into `cmd` (which must already be in the recording
    /// state): upload scene uniforms, then run every pass in order.
    pub fn record_frame(&mut self, cmd: vk::CommandBuffer, frame_index: u32) -> Result<()> {
        let (camera_uniforms, light_uniforms) = {
            let scene = self.scene.read();
            (
                scene.build_active_camera_uniforms(),
                scene.build_light_uniforms(),
            )
        };

        let frame_slot = frame_index % self.frame_resources.len() as u32;
        let frame = &self.frame_resources[frame_slot as usize];

        // The per-frame buffers are device-local; push the new uniforms
        // through the transfer engine and wait before any pass reads them.
        let camera_token = self.service.upload_camera_data(frame, &camera_uniforms)?;
        let light_token = self.service.upload_light_data(frame, &light_uniforms)?;
        camera_token.wait(u64::MAX).map_err(RenderError::Gpu)?;
        light_token.wait(u64::MAX).map_err(RenderError::Gpu)?;

        let mut swapchain_in_frame = false;
        for index in 0..self.pass_runtimes.len() {
            self.record_pass(index, cmd, frame_index, frame_slot, &mut swapchain_in_frame)?;
        }

        if swapchain_in_frame {
            let image = self.swapchain.images[frame_index as usize % self.swapchain.images.len()];
            unsafe {
                barrier::cmd_transition_image(
                    &self.device,
                    cmd,
                    &ImageLayoutTransition::color(
                        image,
                        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                        vk::ImageLayout::PRESENT_SRC_KHR,
                    ),
                );
            }
        }

        Ok(())
    }

    fn build_pass_runtimes(&mut self) -> Result<()> {
        self.pass_runtimes.clear();

        let passes: Vec<RenderPassDefinition> = self.config.render_passes.passes().to_vec();
        for pass in passes {
            let layout = self.pipeline_library.get_or_create_layout(&pass.shader_prefix)?;
            let pipeline = self.pipeline_library.get_or_create_default_pipeline(
                &pass.shader_prefix,
                &pass,
                &self.config.swapchain_attachment_name,
                self.swapchain.format,
            )?;
            self.pass_runtimes.push(PassRuntime {
                pass,
                pipeline,
                layout,
                depth_initialized: false,
            });
        }
        Ok(())
    }

    fn record_pass(
        &mut self,
        index: usize,
        cmd: vk::CommandBuffer,
        frame_index: u32,
        frame_slot: u32,
        swapchain_in_frame: &mut bool,
    ) -> Result<()> {
        // Resolve attachments and issue layout barriers before the
        // immutable recording phase below.
        let swapchain_image_index = frame_index as usize % self.swapchain.views.len().max(1);

        let mut color_infos: Vec<vk::RenderingAttachmentInfo> = Vec::new();
        for attachment in &self.pass_runtimes[index].pass.resources.color_outputs {
            let view = if attachment.resource_name == self.config.swapchain_attachment_name {
                if self.swapchain.views.is_empty() {
                    return Err(RenderError::InvalidArgument(
                        "no swapchain target bound".to_string(),
                    ));
                }
                if !*swapchain_in_frame {
                    // First swapchain use this frame: the previous contents
                    // are discarded by transitioning from Undefined.
                    unsafe {
                        barrier::cmd_transition_image(
                            &self.device,
                            cmd,
                            &ImageLayoutTransition::color(
                                self.swapchain.images[swapchain_image_index],
                                vk::ImageLayout::UNDEFINED,
                                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                            ),
                        );
                    }
                    *swapchain_in_frame = true;
                }
                self.swapchain.views[swapchain_image_index]
            } else {
                self.render_targets
                    .get(&attachment.resource_name)
                    .ok_or_else(|| {
                        RenderError::InvalidArgument(format!(
                            "unknown attachment name '{}'",
                            attachment.resource_name
                        ))
                    })?
                    .view()
            };

            let mut info = vk::RenderingAttachmentInfo::default()
                .image_view(view)
                .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .load_op(attachment.load_op)
                .store_op(attachment.store_op);
            if let Some(clear) = attachment.clear_value {
                info = info.clear_value(clear);
            }
            color_infos.push(info);
        }

        let mut depth_info: Option<vk::RenderingAttachmentInfo> = None;
        if let Some(depth) = &self.pass_runtimes[index].pass.resources.depth_stencil_output {
            let image = self
                .render_targets
                .get(&depth.resource_name)
                .ok_or_else(|| {
                    RenderError::InvalidArgument(format!(
                        "unknown depth attachment name '{}'",
                        depth.resource_name
                    ))
                })?;

            if !self.pass_runtimes[index].depth_initialized {
                unsafe {
                    barrier::cmd_transition_image(
                        &self.device,
                        cmd,
                        &ImageLayoutTransition {
                            image: image.handle(),
                            old_layout: vk::ImageLayout::UNDEFINED,
                            new_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                            aspect_mask: image.aspect_mask(),
                            base_mip_level: 0,
                            level_count: image.mip_levels(),
                            base_array_layer: 0,
                            layer_count: image.array_layers(),
                        },
                    );
                }
            }

            let mut info = vk::RenderingAttachmentInfo::default()
                .image_view(image.view())
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(depth.load_op)
                .store_op(depth.store_op);
            if let Some(clear) = depth.clear_value {
                info = info.clear_value(clear);
            }
            depth_info = Some(info);
        }
        self.pass_runtimes[index].depth_initialized = true;

        let runtime = &self.pass_runtimes[index];
        let pass_extent = runtime.pass.render_extent;
        let extent = if pass_extent.width > 0 && pass_extent.height > 0 {
            pass_extent
        } else {
            self.render_extent
        };

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .color_attachments(&color_infos);
        if let Some(depth) = &depth_info {
            rendering_info = rendering_info.depth_attachment(depth);
        }

        unsafe {
            self.device.cmd_begin_rendering(cmd, &rendering_info);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            self.device.cmd_set_viewport(cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(
                cmd,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                }],
            );

            if runtime.pipeline != vk::Pipeline::null() {
                self.device
                    .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, runtime.pipeline);
            }
        }

        if let Some(callback) = self.callbacks.get(&runtime.pass.name) {
            let scene = self.scene.read();
            let ctx = PassDrawContext {
                cmd,
                frame_index: frame_slot,
                pipeline_layout: runtime.layout,
                frame_resources: &self.frame_resources[frame_slot as usize],
                scene: &scene,
                resources: &self.resources,
                materials: self.materials.as_deref(),
            };
            callback(&runtime.pass, &ctx);
        }

        unsafe {
            self.device.cmd_end_rendering(cmd);
        }

        Ok(())
    }
}
