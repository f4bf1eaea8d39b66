//! Central resource cache.
//!
//! Mesh, texture, and shader programs are cached by a normalized absolute
//! path. Synchronous loads parse outside the cache lock; asynchronous loads
//! dedupe concurrent requests for the same id through shared futures and a
//! `loading` table that tasks clear on completion.

use crate::error::{AssetError, Result};
use crate::future::LoadFuture;
use crate::mesh;
use crate::shader;
use crate::texture;
use crate::types::{MeshData, ShaderProgram, ShaderModule, TextureData, Vertex};
use ash::vk;
use glam::Vec4;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread;

use prism_gpu::{
    DescriptorLayoutCache, DescriptorPoolAllocator, DescriptorSetSchema, GpuError,
};

/// Id of the cube mesh every cache is primed with.
pub const DEFAULT_CUBE_ID: &str = "default_cube";
/// Id of the 4x4 white texture every cache is primed with.
pub const DEFAULT_WHITE_ID: &str = "default_white";

/// Highest descriptor set index probed when collecting a shader's schemas.
const MAX_DESCRIPTOR_SETS: u32 = 8;

/// Result carried by load futures: the resource id, or the load error.
pub type LoadResult = std::result::Result<String, AssetError>;
/// Shared handle to an in-flight or completed load.
pub type LoadHandle = LoadFuture<LoadResult>;

/// Canonical cache key for a path: absolute, with `.` and `..` collapsed
/// lexically. Idempotent.
pub fn normalize_resource_path(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized.to_string_lossy().into_owned()
}

struct CacheMapState<T> {
    loaded: HashMap<String, Arc<T>>,
    loading: HashMap<String, LoadHandle>,
}

/// One id-keyed cache: loaded values plus in-flight load futures, guarded by
/// a single mutex. The mutex is never held across parsing or file IO.
pub(crate) struct CacheMap<T> {
    state: Mutex<CacheMapState<T>>,
}

impl<T: Send + Sync + 'static> CacheMap<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CacheMapState {
                loaded: HashMap::new(),
                loading: HashMap::new(),
            }),
        })
    }

    fn get(&self, id: &str) -> Option<Arc<T>> {
        self.state.lock().loaded.get(id).cloned()
    }

    fn contains(&self, id: &str) -> bool {
        self.state.lock().loaded.contains_key(id)
    }

    /// Insert unless present; the existing value wins a race and the loser's
    /// value is discarded.
    fn insert(&self, id: String, value: Arc<T>) -> Arc<T> {
        let mut state = self.state.lock();
        state.loaded.entry(id).or_insert(value).clone()
    }

    fn unload(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        state.loading.remove(id);
        state.loaded.remove(id).is_some()
    }

    #[cfg(test)]
    fn loaded_count(&self) -> usize {
        self.state.lock().loaded.len()
    }

    /// Start (or join) an asynchronous load for `id`.
    ///
    /// Under one lock: already loaded resolves immediately, an in-flight load
    /// is joined by cloning its future, otherwise the future is registered
    /// and a worker thread runs the loader. The task removes its `loading`
    /// entry before fulfilling the future.
    fn load_async(
        self: &Arc<Self>,
        id: String,
        loader: impl FnOnce() -> LoadResult + Send + 'static,
    ) -> LoadHandle {
        let future = LoadFuture::pending();
        {
            let mut state = self.state.lock();
            if state.loaded.contains_key(&id) {
                return LoadFuture::ready(Ok(id));
            }
            if let Some(existing) = state.loading.get(&id) {
                return existing.clone();
            }
            state.loading.insert(id.clone(), future.clone());
        }

        let map = self.clone();
        let task_future = future.clone();
        let task_id = id.clone();
        let spawned = thread::Builder::new()
            .name("asset-loader".to_string())
            .spawn(move || {
                let result = loader();
                map.state.lock().loading.remove(&task_id);
                task_future.fulfill(result);
            });

        if let Err(e) = spawned {
            self.state.lock().loading.remove(&id);
            future.fulfill(Err(AssetError::FileSystem(format!(
                "failed to spawn loader thread: {e}"
            ))));
        }

        future
    }
}

struct CacheInner {
    device: ash::Device,
    layout_cache: DescriptorLayoutCache,
    pool_allocator: DescriptorPoolAllocator,
    meshes: Arc<CacheMap<Vec<MeshData>>>,
    textures: Arc<CacheMap<TextureData>>,
    shaders: Arc<CacheMap<ShaderProgram>>,
    descriptor_sets: Mutex<HashMap<String, Vec<vk::DescriptorSet>>>,
}

/// Thread-safe cache of meshes, textures, and shader programs, plus the
/// descriptor layout cache and pool allocator fed by shader reflection.
/// Clones share the same underlying cache.
#[derive(Clone)]
pub struct ResourceCache {
    inner: Arc<CacheInner>,
}

impl ResourceCache {
    /// Create a cache, primed with the default cube mesh and white texture.
    pub fn new(device: &ash::Device) -> Self {
        let inner = Arc::new(CacheInner {
            device: device.clone(),
            layout_cache: DescriptorLayoutCache::new(device.clone()),
            pool_allocator: DescriptorPoolAllocator::new(device.clone()),
            meshes: CacheMap::new(),
            textures: CacheMap::new(),
            shaders: CacheMap::new(),
            descriptor_sets: Mutex::new(HashMap::new()),
        });

        inner.meshes.insert(
            DEFAULT_CUBE_ID.to_string(),
            Arc::new(vec![mesh::create_cube(1.0, Vec4::ONE)]),
        );
        inner.textures.insert(
            DEFAULT_WHITE_ID.to_string(),
            Arc::new(texture::solid_color(4, 4, [255, 255, 255, 255])),
        );

        Self { inner }
    }

    pub fn device(&self) -> &ash::Device {
        &self.inner.device
    }

    pub fn layout_cache(&self) -> &DescriptorLayoutCache {
        &self.inner.layout_cache
    }

    pub fn pool_allocator(&self) -> &DescriptorPoolAllocator {
        &self.inner.pool_allocator
    }

    // ---- synchronous loads ----

    /// Load a mesh file, returning its cache id. A second load of the same
    /// path returns the same id without re-parsing.
    pub fn load_mesh(&self, path: impl AsRef<Path>) -> Result<String> {
        self.inner.load_mesh_sync(path.as_ref())
    }

    /// Load a texture file, returning its cache id.
    pub fn load_texture(&self, path: impl AsRef<Path>) -> Result<String> {
        self.inner.load_texture_sync(path.as_ref())
    }

    /// Load a shader program named `<name>.{vert,frag[,comp]}.spv` inside
    /// `directory`, reflect its descriptor interface, and register the set
    /// layouts under the `name` prefix.
    pub fn load_shader(
        &self,
        directory: impl AsRef<Path>,
        name: &str,
        include_compute: bool,
    ) -> Result<String> {
        self.inner
            .load_shader_sync(directory.as_ref(), name, include_compute)
    }

    // ---- asynchronous loads ----

    /// Asynchronous [`Self::load_mesh`]; concurrent requests for one path
    /// share a single load.
    pub fn load_mesh_async(&self, path: impl AsRef<Path>) -> LoadHandle {
        let path = path.as_ref().to_path_buf();
        let id = normalize_resource_path(&path);
        let inner = self.inner.clone();
        self.inner
            .meshes
            .load_async(id, move || inner.load_mesh_sync(&path))
    }

    /// Asynchronous [`Self::load_texture`].
    pub fn load_texture_async(&self, path: impl AsRef<Path>) -> LoadHandle {
        let path = path.as_ref().to_path_buf();
        let id = normalize_resource_path(&path);
        let inner = self.inner.clone();
        self.inner
            .textures
            .load_async(id, move || inner.load_texture_sync(&path))
    }

    /// Asynchronous [`Self::load_shader`].
    pub fn load_shader_async(
        &self,
        directory: impl AsRef<Path>,
        name: &str,
        include_compute: bool,
    ) -> LoadHandle {
        let directory = directory.as_ref().to_path_buf();
        let name = name.to_string();
        let id = normalize_resource_path(&directory.join(&name));
        let inner = self.inner.clone();
        self.inner.shaders.load_async(id, move || {
            inner.load_shader_sync(&directory, &name, include_compute)
        })
    }

    /// Load several meshes concurrently; resolves to the ids in input order.
    pub fn load_meshes_async(&self, paths: &[PathBuf]) -> LoadFuture<Result<Vec<String>>> {
        let futures: Vec<LoadHandle> = paths.iter().map(|p| self.load_mesh_async(p)).collect();
        batch_future(futures)
    }

    /// Load several textures concurrently; resolves to the ids in input
    /// order.
    pub fn load_textures_async(&self, paths: &[PathBuf]) -> LoadFuture<Result<Vec<String>>> {
        let futures: Vec<LoadHandle> = paths.iter().map(|p| self.load_texture_async(p)).collect();
        batch_future(futures)
    }

    // ---- registration and lookup ----

    /// Register runtime-generated geometry under a name. If the name exists
    /// the existing mesh list is returned unchanged.
    pub fn register_mesh(
        &self,
        name: &str,
        vertices: Vec<Vertex>,
        indices: Vec<u32>,
    ) -> Arc<Vec<MeshData>> {
        let mesh = MeshData {
            debug_name: name.to_string(),
            vertices,
            indices,
        };
        self.inner
            .meshes
            .insert(name.to_string(), Arc::new(vec![mesh]))
    }

    pub fn mesh(&self, id: &str) -> Option<Arc<Vec<MeshData>>> {
        self.inner.meshes.get(id)
    }

    pub fn texture(&self, id: &str) -> Option<Arc<TextureData>> {
        self.inner.textures.get(id)
    }

    /// Look up a shader program by prefix name or normalized path id.
    pub fn shader_program(&self, name: &str) -> Option<Arc<ShaderProgram>> {
        self.inner.shaders.get(name).or_else(|| {
            self.inner
                .shaders
                .get(&normalize_resource_path(Path::new(name)))
        })
    }

    /// Remove a mesh from the cache. The built-in defaults are kept.
    pub fn unload_mesh(&self, id: &str) -> bool {
        if id == DEFAULT_CUBE_ID {
            return false;
        }
        self.inner.meshes.unload(id)
    }

    /// Remove a texture from the cache. The built-in defaults are kept.
    pub fn unload_texture(&self, id: &str) -> bool {
        if id == DEFAULT_WHITE_ID {
            return false;
        }
        self.inner.textures.unload(id)
    }

    // ---- descriptor surface ----

    /// The descriptor schemas registered under a shader prefix, ordered by
    /// set index.
    pub fn shader_schemas(&self, shader_prefix: &str) -> Vec<Arc<DescriptorSetSchema>> {
        (0..MAX_DESCRIPTOR_SETS)
            .filter_map(|set| self.inner.layout_cache.schema(shader_prefix, set))
            .collect()
    }

    /// Allocate (or fetch the cached) descriptor sets for a shader prefix,
    /// one set per schema.
    pub fn get_or_allocate_descriptor_sets(
        &self,
        schemas: &[Arc<DescriptorSetSchema>],
        shader_prefix: &str,
    ) -> Result<Vec<vk::DescriptorSet>> {
        {
            let sets = self.inner.descriptor_sets.lock();
            if let Some(existing) = sets.get(shader_prefix) {
                return Ok(existing.clone());
            }
        }

        if schemas.is_empty() {
            return Err(AssetError::Gpu(GpuError::InvalidArgument(format!(
                "no descriptor schemas provided for prefix '{shader_prefix}'"
            ))));
        }

        let mut allocated = Vec::with_capacity(schemas.len());
        for schema in schemas {
            allocated.push(self.inner.pool_allocator.allocate_one(schema)?);
        }

        let mut sets = self.inner.descriptor_sets.lock();
        Ok(sets
            .entry(shader_prefix.to_string())
            .or_insert(allocated)
            .clone())
    }
}

impl CacheInner {
    fn load_mesh_sync(&self, path: &Path) -> Result<String> {
        if !path.exists() {
            return Err(AssetError::FileSystem(format!(
                "mesh file does not exist: {}",
                path.display()
            )));
        }

        let id = normalize_resource_path(path);
        if self.meshes.contains(&id) {
            return Ok(id);
        }

        let meshes = mesh::load_model(path, false)?;
        if meshes.is_empty() {
            return Err(AssetError::InvalidData(format!(
                "mesh file contains no geometry: {}",
                path.display()
            )));
        }

        tracing::debug!("Loaded mesh {} ({} submeshes)", id, meshes.len());
        self.meshes.insert(id.clone(), Arc::new(meshes));
        Ok(id)
    }

    fn load_texture_sync(&self, path: &Path) -> Result<String> {
        if !path.exists() {
            return Err(AssetError::FileSystem(format!(
                "texture file does not exist: {}",
                path.display()
            )));
        }

        let id = normalize_resource_path(path);
        if self.textures.contains(&id) {
            return Ok(id);
        }

        let texture = texture::load_texture(path, 0, false)?;
        if !texture.is_valid() {
            return Err(AssetError::InvalidData(format!(
                "texture decoded empty: {}",
                path.display()
            )));
        }

        tracing::debug!("Loaded texture {} ({}x{})", id, texture.width, texture.height);
        self.textures.insert(id.clone(), Arc::new(texture));
        Ok(id)
    }

    fn load_shader_sync(&self, directory: &Path, name: &str, include_compute: bool) -> Result<String> {
        if !directory.exists() {
            return Err(AssetError::FileSystem(format!(
                "shader directory does not exist: {}",
                directory.display()
            )));
        }

        let id = normalize_resource_path(&directory.join(name));
        if self.shaders.contains(&id) {
            return Ok(id);
        }

        let vertex_bytes = shader::read_spirv_file(&directory.join(format!("{name}.vert.spv")))?;
        let fragment_bytes = shader::read_spirv_file(&directory.join(format!("{name}.frag.spv")))?;
        let compute_bytes = if include_compute {
            Some(shader::read_spirv_file(&directory.join(format!("{name}.comp.spv")))?)
        } else {
            None
        };

        // Reflect and merge before touching the layout cache so a failed
        // merge registers nothing.
        let mut per_module = vec![
            shader::reflect_module(&vertex_bytes, vk::ShaderStageFlags::VERTEX)?,
            shader::reflect_module(&fragment_bytes, vk::ShaderStageFlags::FRAGMENT)?,
        ];
        if let Some(bytes) = &compute_bytes {
            per_module.push(shader::reflect_module(bytes, vk::ShaderStageFlags::COMPUTE)?);
        }
        let merged = shader::merge_reflections(&per_module)?;

        let mut set_indices: Vec<u32> = merged.keys().copied().collect();
        set_indices.sort_unstable();
        for set_index in set_indices {
            let bindings = &merged[&set_index];
            if bindings.is_empty() {
                continue;
            }
            self.layout_cache
                .register_set_layout(name, set_index, bindings)?;
        }

        let program = ShaderProgram {
            vertex: Some(Arc::new(ShaderModule::new(
                &self.device,
                &shader::spirv_words(&vertex_bytes),
                vk::ShaderStageFlags::VERTEX,
            )?)),
            fragment: Some(Arc::new(ShaderModule::new(
                &self.device,
                &shader::spirv_words(&fragment_bytes),
                vk::ShaderStageFlags::FRAGMENT,
            )?)),
            compute: match &compute_bytes {
                Some(bytes) => Some(Arc::new(ShaderModule::new(
                    &self.device,
                    &shader::spirv_words(bytes),
                    vk::ShaderStageFlags::COMPUTE,
                )?)),
                None => None,
            },
        };

        tracing::debug!("Loaded shader program '{}' ({} sets)", name, merged.len());

        // Stored under both the normalized path id and the bare prefix so
        // render code can look programs up by prefix.
        let program = Arc::new(program);
        self.shaders.insert(id.clone(), program.clone());
        self.shaders.insert(name.to_string(), program);
        Ok(id)
    }
}

fn batch_future(futures: Vec<LoadHandle>) -> LoadFuture<Result<Vec<String>>> {
    let result = LoadFuture::pending();
    let out = result.clone();

    let spawned = thread::Builder::new()
        .name("asset-batch".to_string())
        .spawn(move || {
            let mut ids = Vec::with_capacity(futures.len());
            for future in futures {
                match future.wait() {
                    Ok(id) => ids.push(id),
                    Err(e) => {
                        out.fulfill(Err(e));
                        return;
                    }
                }
            }
            out.fulfill(Ok(ids));
        });

    if let Err(e) = spawned {
        result.fulfill(Err(AssetError::FileSystem(format!(
            "failed to spawn batch thread: {e}"
        ))));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn normalization_is_idempotent() {
        let id = normalize_resource_path(Path::new("assets/./meshes/../meshes/cube.obj"));
        let again = normalize_resource_path(Path::new(&id));
        assert_eq!(id, again);
        assert!(!id.contains("/./"));
        assert!(!id.contains(".."));
        assert!(id.ends_with("cube.obj"));
    }

    #[test]
    fn normalization_collapses_duplicates() {
        let a = normalize_resource_path(Path::new("assets/cube.obj"));
        let b = normalize_resource_path(Path::new("assets/./other/../cube.obj"));
        assert_eq!(a, b);
    }

    #[test]
    fn cache_map_insert_keeps_first_value() {
        let map: Arc<CacheMap<u32>> = CacheMap::new();
        let first = map.insert("a".to_string(), Arc::new(1));
        let second = map.insert("a".to_string(), Arc::new(2));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*map.get("a").unwrap(), 1);
    }

    #[test]
    fn cache_map_unload_removes_entry() {
        let map: Arc<CacheMap<u32>> = CacheMap::new();
        map.insert("a".to_string(), Arc::new(1));
        assert!(map.unload("a"));
        assert!(!map.unload("a"));
        assert!(map.get("a").is_none());
    }

    #[test]
    fn async_load_of_loaded_entry_resolves_immediately() {
        let map: Arc<CacheMap<u32>> = CacheMap::new();
        map.insert("ready".to_string(), Arc::new(9));
        let handle = map.load_async("ready".to_string(), || panic!("loader must not run"));
        assert_eq!(handle.try_get(), Some(Ok("ready".to_string())));
    }

    #[test]
    fn concurrent_async_loads_coalesce_into_one() {
        let map: Arc<CacheMap<u64>> = CacheMap::new();
        let load_count = Arc::new(AtomicUsize::new(0));

        let handles: Vec<LoadHandle> = (0..8)
            .map(|_| {
                let map_for_loader = map.clone();
                let count = load_count.clone();
                map.load_async("shared".to_string(), move || {
                    count.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    map_for_loader.insert("shared".to_string(), Arc::new(1));
                    Ok("shared".to_string())
                })
            })
            .collect();

        for handle in &handles {
            assert_eq!(handle.wait(), Ok("shared".to_string()));
        }

        assert_eq!(load_count.load(Ordering::SeqCst), 1);
        assert_eq!(map.loaded_count(), 1);
    }

    #[test]
    fn failed_async_load_clears_loading_entry() {
        let map: Arc<CacheMap<u32>> = CacheMap::new();
        let handle = map.load_async("broken".to_string(), || {
            Err(AssetError::FileSystem("missing".to_string()))
        });
        assert!(matches!(handle.wait(), Err(AssetError::FileSystem(_))));

        // A later load is a fresh attempt, not a cached failure.
        let retry = map.load_async("broken".to_string(), || Ok("broken".to_string()));
        assert_eq!(retry.wait(), Ok("broken".to_string()));
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn cache_primes_default_resources() {
        let ctx = prism_gpu::GpuContextBuilder::new()
            .app_name("prism-asset-test")
            .validation(true)
            .build()
            .unwrap();
        let cache = ResourceCache::new(ctx.device());

        let cube = cache.mesh(DEFAULT_CUBE_ID).unwrap();
        assert_eq!(cube[0].vertices.len(), 24);
        assert_eq!(cube[0].indices.len(), 36);

        let white = cache.texture(DEFAULT_WHITE_ID).unwrap();
        assert_eq!((white.width, white.height), (4, 4));
        assert!(white.pixels.iter().all(|&b| b == 255));

        assert!(!cache.unload_mesh(DEFAULT_CUBE_ID));
        assert!(cache.mesh(DEFAULT_CUBE_ID).is_some());
    }
}
