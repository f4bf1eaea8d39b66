//! Scene container and GPU uniform layouts.
//!
//! The scene is a flat node list. Nodes get stable, monotonically assigned
//! ids starting at 1; id 0 means "no node" and is used for the
//! no-active-camera state.

use glam::{Mat4, Quat, Vec3, Vec4};

/// Camera parameters. Right-handed world, clip-space depth range [0, 1].
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    /// Width / height.
    pub aspect: f32,
    pub near_clip: f32,
    pub far_clip: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            target: Vec3::NEG_Z,
            up: Vec3::Y,
            fov_y: 60f32.to_radians(),
            aspect: 16.0 / 9.0,
            near_clip: 0.1,
            far_clip: 1000.0,
        }
    }
}

impl Camera {
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Perspective projection with [0, 1] clip-space depth.
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near_clip, self.far_clip)
    }
}

/// Camera data as the shaders see it. 16-byte aligned.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniforms {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub view_position: [f32; 4],
}

impl Default for CameraUniforms {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY.to_cols_array_2d(),
            projection: Mat4::IDENTITY.to_cols_array_2d(),
            view_position: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Light source kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightType {
    Point = 0,
    Directional = 1,
    Spot = 2,
}

/// A light source. Fields unused by a given type keep their defaults.
#[derive(Debug, Clone)]
pub struct Light {
    pub light_type: LightType,
    /// Linear-space color.
    pub color: Vec3,
    pub intensity: f32,
    /// Direction for directional and spot lights; must be unit length.
    pub direction: Vec3,
    /// Position for point and spot lights.
    pub position: Vec3,
    /// Falloff range for point and spot lights.
    pub range: f32,
    /// Spot inner cone angle in radians.
    pub inner_cone: f32,
    /// Spot outer cone angle in radians.
    pub outer_cone: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            light_type: LightType::Directional,
            color: Vec3::ONE,
            intensity: 1.0,
            direction: Vec3::NEG_Y,
            position: Vec3::ZERO,
            range: 100.0,
            inner_cone: 15f32.to_radians(),
            outer_cone: 25f32.to_radians(),
        }
    }
}

/// One light packed for the GPU.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuLight {
    /// xyz = world position, w = range.
    pub position: [f32; 4],
    /// xyz = unit direction, w = light type.
    pub direction: [f32; 4],
    /// rgb = color, w = intensity.
    pub color_intensity: [f32; 4],
    /// x = inner cone, y = outer cone, z/w reserved.
    pub spot_params: [f32; 4],
}

/// Maximum lights per frame.
pub const MAX_LIGHTS: usize = 16;

/// All lights packed for the GPU, with the active count.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightUniforms {
    pub lights: [GpuLight; MAX_LIGHTS],
    pub light_count: u32,
    pub _pad: [u32; 3],
}

impl Default for LightUniforms {
    fn default() -> Self {
        bytemuck::Zeroable::zeroed()
    }
}

/// Translation, rotation, and scale.
#[derive(Debug, Clone)]
pub struct TransformComponent {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for TransformComponent {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl TransformComponent {
    /// The TRS matrix (translate, then rotate, then scale).
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

/// Mesh and material references for a drawable node.
#[derive(Debug, Clone, Default)]
pub struct RenderableComponent {
    /// Resource-cache mesh id.
    pub mesh_id: String,
    /// Material-manager material id.
    pub material_id: String,
    pub visible: bool,
}

/// Axis-aligned box collider.
#[derive(Debug, Clone)]
pub struct ColliderComponent {
    pub center: Vec3,
    pub half_extents: Vec3,
}

impl Default for ColliderComponent {
    fn default() -> Self {
        Self {
            center: Vec3::ZERO,
            half_extents: Vec3::splat(0.5),
        }
    }
}

/// Scene node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneNodeType {
    Camera,
    Light,
    Renderable,
}

/// One node in the scene: an id, a type, a transform, and optional
/// components.
#[derive(Debug, Clone)]
pub struct SceneNode {
    pub id: u32,
    pub node_type: SceneNodeType,
    pub transform: TransformComponent,
    pub collider: Option<ColliderComponent>,
    pub camera: Option<Camera>,
    pub light: Option<Light>,
    pub renderable: Option<RenderableComponent>,
}

/// Flat scene container. Node ids are never reused within a scene; the
/// first camera created becomes the active camera.
#[derive(Default)]
pub struct Scene {
    nodes: Vec<SceneNode>,
    next_id: u32,
    active_camera_id: u32,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            next_id: 1,
            active_camera_id: 0,
        }
    }

    fn create_node(&mut self, node_type: SceneNodeType) -> &mut SceneNode {
        let node = SceneNode {
            id: self.next_id,
            node_type,
            transform: TransformComponent::default(),
            collider: None,
            camera: None,
            light: None,
            renderable: None,
        };
        self.next_id += 1;
        self.nodes.push(node);
        self.nodes.last_mut().expect("node was just pushed")
    }

    /// Create a camera node. The first one becomes the active camera.
    pub fn create_camera_node(&mut self, camera: Camera) -> &mut SceneNode {
        let position = camera.position;
        let node = self.create_node(SceneNodeType::Camera);
        node.transform.position = position;
        node.camera = Some(camera);
        let id = node.id;
        if self.active_camera_id == 0 {
            self.active_camera_id = id;
        }
        self.node_mut(id).expect("node was just created")
    }

    /// Create a light node.
    pub fn create_light_node(&mut self, light: Light) -> &mut SceneNode {
        let position = light.position;
        let node = self.create_node(SceneNodeType::Light);
        node.transform.position = position;
        node.light = Some(light);
        node
    }

    /// Create a renderable node.
    pub fn create_renderable_node(&mut self, renderable: RenderableComponent) -> &mut SceneNode {
        let node = self.create_node(SceneNodeType::Renderable);
        node.renderable = Some(renderable);
        node
    }

    pub fn node(&self, id: u32) -> Option<&SceneNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: u32) -> Option<&mut SceneNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn nodes(&self) -> &[SceneNode] {
        &self.nodes
    }

    /// Make the node the active camera; ignored unless it has a camera
    /// component.
    pub fn set_active_camera(&mut self, id: u32) {
        if self.node(id).is_some_and(|n| n.camera.is_some()) {
            self.active_camera_id = id;
        }
    }

    /// The active camera node, if any camera exists.
    pub fn active_camera(&self) -> Option<&SceneNode> {
        if self.active_camera_id == 0 {
            return None;
        }
        self.node(self.active_camera_id)
    }

    /// All light nodes with their light components.
    pub fn lights(&self) -> impl Iterator<Item = (&SceneNode, &Light)> {
        self.nodes
            .iter()
            .filter_map(|n| n.light.as_ref().map(|l| (n, l)))
    }

    /// All renderable nodes with their components.
    pub fn renderables(&self) -> impl Iterator<Item = (&SceneNode, &RenderableComponent)> {
        self.nodes
            .iter()
            .filter_map(|n| n.renderable.as_ref().map(|r| (n, r)))
    }

    /// Camera uniforms for one camera node.
    pub fn build_camera_uniforms(&self, node: &SceneNode) -> CameraUniforms {
        match &node.camera {
            Some(camera) => CameraUniforms {
                view: camera.view_matrix().to_cols_array_2d(),
                projection: camera.projection_matrix().to_cols_array_2d(),
                view_position: Vec4::from((camera.position, 1.0)).to_array(),
            },
            None => CameraUniforms::default(),
        }
    }

    /// Camera uniforms for the active camera; identity when there is none.
    pub fn build_active_camera_uniforms(&self) -> CameraUniforms {
        match self.active_camera() {
            Some(node) => self.build_camera_uniforms(node),
            None => CameraUniforms::default(),
        }
    }

    /// Pack all lights (clamped to [`MAX_LIGHTS`]) for the GPU.
    pub fn build_light_uniforms(&self) -> LightUniforms {
        let mut uniforms = LightUniforms::default();
        let mut count = 0usize;

        for (node, light) in self.lights() {
            if count >= MAX_LIGHTS {
                break;
            }
            let direction = light.direction.normalize_or_zero();
            uniforms.lights[count] = GpuLight {
                position: Vec4::from((node.transform.position, light.range)).to_array(),
                direction: Vec4::from((direction, light.light_type as u32 as f32)).to_array(),
                color_intensity: Vec4::from((light.color, light.intensity)).to_array(),
                spot_params: [light.inner_cone, light.outer_cone, 0.0, 0.0],
            };
            count += 1;
        }

        uniforms.light_count = count as u32;
        uniforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_monotonic_from_one() {
        let mut scene = Scene::new();
        let a = scene.create_light_node(Light::default()).id;
        let b = scene.create_light_node(Light::default()).id;
        let c = scene
            .create_renderable_node(RenderableComponent::default())
            .id;
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(c, 3);
    }

    #[test]
    fn first_camera_becomes_active() {
        let mut scene = Scene::new();
        assert!(scene.active_camera().is_none());

        let first = scene.create_camera_node(Camera::default()).id;
        let second = scene.create_camera_node(Camera::default()).id;
        assert_eq!(scene.active_camera().unwrap().id, first);

        scene.set_active_camera(second);
        assert_eq!(scene.active_camera().unwrap().id, second);
    }

    #[test]
    fn active_camera_rejects_non_camera_nodes() {
        let mut scene = Scene::new();
        let camera = scene.create_camera_node(Camera::default()).id;
        let light = scene.create_light_node(Light::default()).id;

        scene.set_active_camera(light);
        assert_eq!(scene.active_camera().unwrap().id, camera);
    }

    #[test]
    fn camera_uniforms_default_to_identity_without_camera() {
        let scene = Scene::new();
        let uniforms = scene.build_active_camera_uniforms();
        assert_eq!(uniforms.view, Mat4::IDENTITY.to_cols_array_2d());
        assert_eq!(uniforms.projection, Mat4::IDENTITY.to_cols_array_2d());
    }

    #[test]
    fn camera_uniforms_carry_view_position() {
        let mut scene = Scene::new();
        let camera = Camera {
            position: Vec3::new(1.0, 2.0, 3.0),
            ..Camera::default()
        };
        scene.create_camera_node(camera);

        let uniforms = scene.build_active_camera_uniforms();
        assert_eq!(uniforms.view_position, [1.0, 2.0, 3.0, 1.0]);
    }

    #[test]
    fn light_uniforms_pack_type_and_range() {
        let mut scene = Scene::new();
        scene.create_light_node(Light {
            light_type: LightType::Spot,
            position: Vec3::new(0.0, 5.0, 0.0),
            range: 25.0,
            direction: Vec3::new(0.0, -2.0, 0.0),
            ..Light::default()
        });

        let uniforms = scene.build_light_uniforms();
        assert_eq!(uniforms.light_count, 1);
        let light = &uniforms.lights[0];
        assert_eq!(light.position, [0.0, 5.0, 0.0, 25.0]);
        // Direction is normalized; w carries the light type.
        assert_eq!(light.direction, [0.0, -1.0, 0.0, 2.0]);
    }

    #[test]
    fn light_uniforms_clamp_to_max_lights() {
        let mut scene = Scene::new();
        for _ in 0..(MAX_LIGHTS + 4) {
            scene.create_light_node(Light::default());
        }
        let uniforms = scene.build_light_uniforms();
        assert_eq!(uniforms.light_count, MAX_LIGHTS as u32);
    }

    #[test]
    fn transform_matrix_composes_trs() {
        let transform = TransformComponent {
            position: Vec3::new(1.0, 0.0, 0.0),
            rotation: Quat::IDENTITY,
            scale: Vec3::splat(2.0),
        };
        let m = transform.matrix();
        let p = m.transform_point3(Vec3::new(1.0, 0.0, 0.0));
        assert!((p - Vec3::new(3.0, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn uniform_sizes_match_gpu_layout() {
        assert_eq!(std::mem::size_of::<CameraUniforms>(), 144);
        assert_eq!(std::mem::size_of::<GpuLight>(), 64);
        assert_eq!(
            std::mem::size_of::<LightUniforms>(),
            MAX_LIGHTS * 64 + 16
        );
    }
}
