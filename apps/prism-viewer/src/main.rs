//! Prism demo viewer: the default cube lit by a directional light, drawn
//! through a single forward pass onto the swapchain.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use ash::vk;
use glam::Vec3;
use parking_lot::RwLock;
use tracing::info;

use prism_app::{run_app, AppConfig, AppContext, FrameContext, PrismApp};
use prism_asset::{
    Camera, Light, LightType, MaterialManager, ResourceCache, Scene, DEFAULT_CUBE_ID,
};
use prism_gpu::{
    BufferDesc, BufferUsage, DescriptorSetWriter, ManagedBuffer, MemoryMode, TransferEngine,
    TransferEngineConfig,
};
use prism_render::{
    AttachmentType, RenderAttachment, RenderPassDefinition, RenderPassIo, RenderPassSequence,
    Renderer, RendererConfig, RendererGlobalResources, ShaderRequest, SwapchainTarget,
};

const FORWARD_PASS: &str = "Forward";
const SHADER_PREFIX: &str = "forward";

struct GpuMesh {
    vertex_buffer: ManagedBuffer,
    index_buffer: ManagedBuffer,
    index_count: u32,
}

struct ViewerApp {
    renderer: Renderer,
    #[allow(dead_code)]
    transfer: Arc<TransferEngine>,
    #[allow(dead_code)]
    scene: Arc<RwLock<Scene>>,
}

fn swapchain_target(ctx: &AppContext) -> SwapchainTarget {
    SwapchainTarget {
        images: ctx.swapchain.images.clone(),
        views: ctx.swapchain.image_views.clone(),
        format: ctx.swapchain.format,
        extent: ctx.swapchain.extent,
    }
}

fn upload_cube(
    resources: &ResourceCache,
    ctx: &AppContext,
    transfer: &TransferEngine,
) -> anyhow::Result<GpuMesh> {
    let meshes = resources
        .mesh(DEFAULT_CUBE_ID)
        .context("default cube missing from cache")?;
    let mesh = &meshes[0];

    let vertex_bytes: &[u8] = bytemuck::cast_slice(&mesh.vertices);
    let index_bytes: &[u8] = bytemuck::cast_slice(&mesh.indices);

    let vertex_buffer = ctx.gpu.allocator().create_buffer(&BufferDesc {
        size: vertex_bytes.len() as vk::DeviceSize,
        usage: BufferUsage::VERTEX | BufferUsage::TRANSFER_DST,
        memory: MemoryMode::GpuOnly,
        debug_name: "cube_vertices".to_string(),
    })?;
    let index_buffer = ctx.gpu.allocator().create_buffer(&BufferDesc {
        size: index_bytes.len() as vk::DeviceSize,
        usage: BufferUsage::INDEX | BufferUsage::TRANSFER_DST,
        memory: MemoryMode::GpuOnly,
        debug_name: "cube_indices".to_string(),
    })?;

    let vertex_token = transfer.upload_to_buffer(&vertex_buffer, vertex_bytes, 0)?;
    let index_token = transfer.upload_to_buffer(&index_buffer, index_bytes, 0)?;
    vertex_token.wait(u64::MAX)?;
    index_token.wait(u64::MAX)?;

    Ok(GpuMesh {
        vertex_buffer,
        index_buffer,
        index_count: mesh.indices.len() as u32,
    })
}

fn build_scene(aspect: f32) -> Scene {
    let mut scene = Scene::new();
    scene.create_camera_node(Camera {
        position: Vec3::new(2.0, 2.0, 3.0),
        target: Vec3::ZERO,
        aspect,
        ..Camera::default()
    });
    scene.create_light_node(Light {
        light_type: LightType::Directional,
        direction: Vec3::new(-0.4, -1.0, -0.3),
        intensity: 3.0,
        ..Light::default()
    });
    scene
}

fn forward_pass() -> RenderPassDefinition {
    RenderPassDefinition {
        name: FORWARD_PASS.to_string(),
        shader_prefix: SHADER_PREFIX.to_string(),
        resources: RenderPassIo {
            color_outputs: vec![RenderAttachment {
                attachment_type: AttachmentType::Color,
                resource_name: "Swapchain".to_string(),
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                clear_value: Some(vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: [0.05, 0.05, 0.08, 1.0],
                    },
                }),
                ..Default::default()
            }],
            ..Default::default()
        },
        render_extent: vk::Extent2D::default(),
    }
}

impl PrismApp for ViewerApp {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let resources = ResourceCache::new(ctx.gpu.device());
        let transfer = Arc::new(TransferEngine::new(
            &ctx.gpu,
            ctx.gpu.allocator().clone(),
            TransferEngineConfig::default(),
        ));
        let materials = Arc::new(MaterialManager::new(resources.clone()));
        let scene = Arc::new(RwLock::new(build_scene(ctx.aspect_ratio())));
        info!(
            "Scene built: {} nodes (camera + directional light)",
            scene.read().nodes().len()
        );

        let shader_dir = PathBuf::from("assets/shaders");
        let mut render_passes = RenderPassSequence::new();
        render_passes.add_pass(forward_pass())?;

        let config = RendererConfig {
            global_resources: RendererGlobalResources {
                shaders: vec![ShaderRequest {
                    directory: shader_dir,
                    name: SHADER_PREFIX.to_string(),
                    enable_compute: false,
                }],
                ..Default::default()
            },
            frame_definition: prism_render::FrameResourceDefinition {
                shader_prefix: SHADER_PREFIX.to_string(),
                frames_in_flight: ctx.frames_in_flight() as u32,
                ..Default::default()
            },
            render_passes,
            ..Default::default()
        };

        let mut renderer = Renderer::new(
            &ctx.gpu,
            transfer.clone(),
            resources.clone(),
            Some(materials),
            scene.clone(),
            swapchain_target(ctx),
            config,
        )?;

        let cube = upload_cube(&resources, ctx, &transfer)?;
        info!(
            "Forward pass ready: cube mesh uploaded ({} indices)",
            cube.index_count
        );
        renderer.register_pass_callback(FORWARD_PASS, make_draw_callback(cube));

        Ok(Self {
            renderer,
            transfer,
            scene,
        })
    }

    fn update(&mut self, ctx: &AppContext, _dt: f32) {
        let mut scene = self.scene.write();
        if let Some(node) = scene.active_camera().map(|n| n.id) {
            if let Some(node) = scene.node_mut(node) {
                if let Some(camera) = node.camera.as_mut() {
                    camera.aspect = ctx.aspect_ratio();
                }
            }
        }
    }

    fn render(&mut self, _ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()> {
        self.renderer
            .record_frame(frame.command_buffer, frame.frame_number as u32)?;
        Ok(())
    }

    fn on_resize(&mut self, ctx: &mut AppContext, _width: u32, _height: u32) -> anyhow::Result<()> {
        self.renderer.on_resize(swapchain_target(ctx))?;
        Ok(())
    }
}

fn make_draw_callback(cube: GpuMesh) -> prism_render::PassDrawCallback {
    Box::new(move |_pass, draw| {
        let device = draw.resources.device();

        // Write the frame's uniforms by semantic name; skip bindings the
        // shader does not declare.
        for (set_index, schema) in draw.frame_resources.descriptor_schemas.iter().enumerate() {
            let mut writer = DescriptorSetWriter::begin(
                device,
                schema.clone(),
                draw.frame_resources.descriptor_sets[set_index],
            );
            let mut wrote = false;
            if schema.find_binding("camera").is_some() {
                if writer
                    .write_managed_buffer("camera", &draw.frame_resources.camera_buffer, 0)
                    .is_ok()
                {
                    wrote = true;
                }
            }
            if schema.find_binding("lights").is_some() {
                if writer
                    .write_managed_buffer("lights", &draw.frame_resources.light_buffer, 0)
                    .is_ok()
                {
                    wrote = true;
                }
            }
            if wrote {
                writer.update();
            }
        }

        unsafe {
            if !draw.frame_resources.descriptor_sets.is_empty() {
                device.cmd_bind_descriptor_sets(
                    draw.cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    draw.pipeline_layout,
                    0,
                    &draw.frame_resources.descriptor_sets,
                    &[],
                );
            }

            device.cmd_bind_vertex_buffers(draw.cmd, 0, &[cube.vertex_buffer.handle()], &[0]);
            device.cmd_bind_index_buffer(
                draw.cmd,
                cube.index_buffer.handle(),
                0,
                vk::IndexType::UINT32,
            );
            device.cmd_draw_indexed(draw.cmd, cube.index_count, 1, 0, 0, 0);
        }
    })
}

fn main() -> anyhow::Result<()> {
    run_app::<ViewerApp>(AppConfig::new("Prism Viewer").with_size(1280, 720))
}
