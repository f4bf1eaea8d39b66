//! Descriptor layouts, pooled allocation, and semantic writes.
//!
//! Shader reflection produces per-set binding lists; this module turns them
//! into deduplicated `vk::DescriptorSetLayout`s, allocates sets from a ring
//! of pools, and writes resources by binding *name* so call sites never
//! hard-code binding indices.

use crate::error::{GpuError, Result};
use crate::resource::{ManagedBuffer, ManagedImage, ManagedSampler};
use ash::vk;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// One reflected binding within a descriptor set.
///
/// `name` is semantic metadata only; structural identity is
/// `(binding, descriptor_type, descriptor_count, stage_flags)`.
#[derive(Debug, Clone)]
pub struct DescriptorBindingInfo {
    pub name: String,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub descriptor_count: u32,
    pub stage_flags: vk::ShaderStageFlags,
}

/// Structural identity of a binding, used as part of the layout cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BindingStructure {
    binding: u32,
    descriptor_type: vk::DescriptorType,
    descriptor_count: u32,
    stage_flags: vk::ShaderStageFlags,
}

impl From<&DescriptorBindingInfo> for BindingStructure {
    fn from(info: &DescriptorBindingInfo) -> Self {
        Self {
            binding: info.binding,
            descriptor_type: info.descriptor_type,
            descriptor_count: info.descriptor_count,
            stage_flags: info.stage_flags,
        }
    }
}

#[derive(PartialEq, Eq, Hash)]
struct LayoutKey {
    set_index: u32,
    bindings: Vec<BindingStructure>,
}

/// Immutable description of one descriptor set: its layout handle plus the
/// bindings sorted by binding index. The layout is destroyed when the last
/// reference to the schema goes away.
pub struct DescriptorSetSchema {
    name: String,
    set_index: u32,
    layout: vk::DescriptorSetLayout,
    bindings: Vec<DescriptorBindingInfo>,
    device: ash::Device,
}

impl std::fmt::Debug for DescriptorSetSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSetSchema")
            .field("name", &self.name)
            .field("set_index", &self.set_index)
            .field("layout", &self.layout)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

impl DescriptorSetSchema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_index(&self) -> u32 {
        self.set_index
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Bindings, strictly sorted by binding index.
    pub fn bindings(&self) -> &[DescriptorBindingInfo] {
        &self.bindings
    }

    /// Look up a binding by its semantic name.
    pub fn find_binding(&self, name: &str) -> Option<&DescriptorBindingInfo> {
        self.bindings.iter().find(|b| b.name == name)
    }
}

impl Drop for DescriptorSetSchema {
    fn drop(&mut self) {
        if self.layout != vk::DescriptorSetLayout::null() {
            unsafe {
                self.device.destroy_descriptor_set_layout(self.layout, None);
            }
            self.layout = vk::DescriptorSetLayout::null();
        }
    }
}

fn structure_matches(a: &[DescriptorBindingInfo], b: &[DescriptorBindingInfo]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.binding == y.binding
                && x.descriptor_type == y.descriptor_type
                && x.descriptor_count == y.descriptor_count
                && x.stage_flags == y.stage_flags
        })
}

fn name_key(schema_name: &str, set_index: u32) -> String {
    format!("{schema_name}#{set_index}")
}

#[derive(Default)]
struct LayoutCacheState {
    by_structure: HashMap<LayoutKey, Arc<DescriptorSetSchema>>,
    by_name: HashMap<String, Weak<DescriptorSetSchema>>,
}

/// Structural dedup table for descriptor set layouts.
///
/// Two registrations with the same structure share one schema regardless of
/// name. The name index holds weak references only, so a schema's lifetime
/// is carried by the structural entry and by external holders.
pub struct DescriptorLayoutCache {
    device: ash::Device,
    state: Mutex<LayoutCacheState>,
}

impl DescriptorLayoutCache {
    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            state: Mutex::new(LayoutCacheState::default()),
        }
    }

    /// Register a set layout under `(schema_name, set_index)`.
    ///
    /// Re-registering an existing name with an identical structure returns
    /// the existing schema; a different structure is an error. Registrations
    /// with a new name but a known structure share the existing layout.
    pub fn register_set_layout(
        &self,
        schema_name: &str,
        set_index: u32,
        bindings: &[DescriptorBindingInfo],
    ) -> Result<Arc<DescriptorSetSchema>> {
        let mut canonical = bindings.to_vec();
        canonical.sort_by_key(|b| b.binding);

        let mut state = self.state.lock();
        let key_name = name_key(schema_name, set_index);

        if let Some(existing) = state.by_name.get(&key_name).and_then(Weak::upgrade) {
            if !structure_matches(&existing.bindings, &canonical) {
                return Err(GpuError::IncompatibleSchema(format!(
                    "schema '{schema_name}' set {set_index} already registered with a different structure"
                )));
            }
            return Ok(existing);
        }

        let key = LayoutKey {
            set_index,
            bindings: canonical.iter().map(BindingStructure::from).collect(),
        };
        if let Some(schema) = state.by_structure.get(&key) {
            let schema = schema.clone();
            state.by_name.insert(key_name, Arc::downgrade(&schema));
            return Ok(schema);
        }

        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = canonical
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.descriptor_count)
                    .stage_flags(b.stage_flags)
            })
            .collect();

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        let layout = unsafe { self.device.create_descriptor_set_layout(&layout_info, None)? };

        let schema = Arc::new(DescriptorSetSchema {
            name: schema_name.to_string(),
            set_index,
            layout,
            bindings: canonical,
            device: self.device.clone(),
        });

        state.by_structure.insert(key, schema.clone());
        state.by_name.insert(key_name, Arc::downgrade(&schema));
        Ok(schema)
    }

    /// Look up a schema by name and set index.
    pub fn schema(&self, schema_name: &str, set_index: u32) -> Option<Arc<DescriptorSetSchema>> {
        let state = self.state.lock();
        state
            .by_name
            .get(&name_key(schema_name, set_index))
            .and_then(Weak::upgrade)
    }

    /// Convenience: the raw layout handle for `(schema_name, set_index)`.
    pub fn layout(&self, schema_name: &str, set_index: u32) -> Option<vk::DescriptorSetLayout> {
        self.schema(schema_name, set_index).map(|s| s.layout())
    }

    /// Drop all cached schemas. Layouts still referenced externally survive
    /// until those references go away.
    pub fn cleanup(&self) {
        let mut state = self.state.lock();
        state.by_structure.clear();
        state.by_name.clear();
    }
}

struct PoolRing {
    current: Option<vk::DescriptorPool>,
    used: Vec<vk::DescriptorPool>,
    free: Vec<vk::DescriptorPool>,
}

/// Ring of descriptor pools. Exhausted pools go to the used list and a free
/// or fresh pool takes over; `reset_pools` recycles everything without
/// destroying it.
pub struct DescriptorPoolAllocator {
    device: ash::Device,
    state: Mutex<PoolRing>,
}

impl DescriptorPoolAllocator {
    const MAX_SETS_PER_POOL: u32 = 1024;

    pub fn new(device: ash::Device) -> Self {
        Self {
            device,
            state: Mutex::new(PoolRing {
                current: None,
                used: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    /// Allocate one descriptor set for a schema.
    pub fn allocate_one(&self, schema: &DescriptorSetSchema) -> Result<vk::DescriptorSet> {
        Ok(self.allocate(schema, 1)?[0])
    }

    /// Allocate `count` descriptor sets for a schema.
    pub fn allocate(&self, schema: &DescriptorSetSchema, count: u32) -> Result<Vec<vk::DescriptorSet>> {
        if count == 0 {
            return Err(GpuError::InvalidArgument(
                "descriptor set allocation with count 0".to_string(),
            ));
        }
        if schema.layout() == vk::DescriptorSetLayout::null() {
            return Err(GpuError::InvalidArgument(format!(
                "schema '{}' has no layout",
                schema.name()
            )));
        }

        let mut ring = self.state.lock();
        let pool = match ring.current {
            Some(pool) => pool,
            None => self.acquire_pool(&mut ring)?,
        };

        let layouts = vec![schema.layout(); count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        match unsafe { self.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => Ok(sets),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) | Err(vk::Result::ERROR_FRAGMENTED_POOL) => {
                let pool = self.acquire_pool(&mut ring)?;
                let alloc_info = vk::DescriptorSetAllocateInfo::default()
                    .descriptor_pool(pool)
                    .set_layouts(&layouts);
                Ok(unsafe { self.device.allocate_descriptor_sets(&alloc_info)? })
            }
            Err(e) => Err(GpuError::Vulkan(e)),
        }
    }

    /// Return every used pool to the free list without destroying it.
    ///
    /// # Safety contract
    /// No descriptor set allocated from these pools may still be in use.
    pub fn reset_pools(&self) -> Result<()> {
        let mut ring = self.state.lock();
        for pool in ring.used.drain(..).collect::<Vec<_>>() {
            unsafe {
                self.device
                    .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())?;
            }
            ring.free.push(pool);
        }
        ring.current = None;
        Ok(())
    }

    /// Destroy all pools.
    pub fn cleanup(&self) {
        let mut ring = self.state.lock();
        let mut pools: Vec<_> = ring.used.drain(..).collect();
        pools.extend(ring.free.drain(..));
        for pool in pools {
            unsafe {
                self.device.destroy_descriptor_pool(pool, None);
            }
        }
        ring.current = None;
    }

    fn acquire_pool(&self, ring: &mut PoolRing) -> Result<vk::DescriptorPool> {
        if let Some(pool) = ring.free.pop() {
            ring.used.push(pool);
            ring.current = Some(pool);
            return Ok(pool);
        }

        // Generous sizing for a mixed workload.
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: 512,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 1024,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: 1024,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: 512,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
                descriptor_count: 256,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_TEXEL_BUFFER,
                descriptor_count: 256,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1024,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 1024,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                descriptor_count: 256,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
                descriptor_count: 256,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::INPUT_ATTACHMENT,
                descriptor_count: 256,
            },
        ];

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(Self::MAX_SETS_PER_POOL)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { self.device.create_descriptor_pool(&create_info, None)? };
        ring.used.push(pool);
        ring.current = Some(pool);
        Ok(pool)
    }
}

impl Drop for DescriptorPoolAllocator {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Keep the last `max` elements of a queued array write.
///
/// When a caller supplies more elements than the binding's declared count,
/// the most recently supplied entries win.
fn keep_last<T: Copy>(infos: &[T], max: u32) -> Vec<T> {
    let max = max as usize;
    if infos.len() > max {
        infos[infos.len() - max..].to_vec()
    } else {
        infos.to_vec()
    }
}

#[derive(Debug)]
struct BufferWrite {
    binding: u32,
    descriptor_type: vk::DescriptorType,
    max_count: u32,
    infos: Vec<vk::DescriptorBufferInfo>,
}

#[derive(Debug)]
struct ImageWrite {
    binding: u32,
    descriptor_type: vk::DescriptorType,
    max_count: u32,
    infos: Vec<vk::DescriptorImageInfo>,
}

/// Queues descriptor writes by binding name, then flushes them in a single
/// `vkUpdateDescriptorSets` call.
///
/// A single-value write replaces anything previously queued for the binding.
/// Array writes keep the last `min(N, descriptor_count)` elements. `update`
/// clears the queue so the writer can be reused.
pub struct DescriptorSetWriter {
    device: ash::Device,
    schema: Arc<DescriptorSetSchema>,
    set: vk::DescriptorSet,
    buffer_writes: Vec<BufferWrite>,
    image_writes: Vec<ImageWrite>,
}

impl std::fmt::Debug for DescriptorSetWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSetWriter")
            .field("schema", &self.schema)
            .field("set", &self.set)
            .field("buffer_writes", &self.buffer_writes)
            .field("image_writes", &self.image_writes)
            .finish_non_exhaustive()
    }
}

impl DescriptorSetWriter {
    /// Start a write session against one schema and one set.
    pub fn begin(device: &ash::Device, schema: Arc<DescriptorSetSchema>, set: vk::DescriptorSet) -> Self {
        Self {
            device: device.clone(),
            schema,
            set,
            buffer_writes: Vec::new(),
            image_writes: Vec::new(),
        }
    }

    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    fn binding_or_err(&self, name: &str) -> Result<DescriptorBindingInfo> {
        self.schema.find_binding(name).cloned().ok_or_else(|| {
            GpuError::NotFound(format!(
                "binding '{name}' in schema '{}' set {}",
                self.schema.name(),
                self.schema.set_index()
            ))
        })
    }

    /// Queue a single buffer write.
    pub fn write_buffer(&mut self, name: &str, info: vk::DescriptorBufferInfo) -> Result<&mut Self> {
        let binding = self.binding_or_err(name)?;
        let write = self.buffer_write_slot(&binding);
        write.infos.clear();
        write.infos.push(info);
        Ok(self)
    }

    /// Queue an array buffer write.
    pub fn write_buffers(&mut self, name: &str, infos: &[vk::DescriptorBufferInfo]) -> Result<&mut Self> {
        let binding = self.binding_or_err(name)?;
        let max_count = binding.descriptor_count;
        let write = self.buffer_write_slot(&binding);
        write.infos = keep_last(infos, max_count);
        Ok(self)
    }

    /// Queue a single image write.
    pub fn write_image(&mut self, name: &str, info: vk::DescriptorImageInfo) -> Result<&mut Self> {
        let binding = self.binding_or_err(name)?;
        let write = self.image_write_slot(&binding);
        write.infos.clear();
        write.infos.push(info);
        Ok(self)
    }

    /// Queue an array image write.
    pub fn write_images(&mut self, name: &str, infos: &[vk::DescriptorImageInfo]) -> Result<&mut Self> {
        let binding = self.binding_or_err(name)?;
        let max_count = binding.descriptor_count;
        let write = self.image_write_slot(&binding);
        write.infos = keep_last(infos, max_count);
        Ok(self)
    }

    /// Queue a whole-buffer write for a managed buffer.
    pub fn write_managed_buffer(
        &mut self,
        name: &str,
        buffer: &ManagedBuffer,
        offset: vk::DeviceSize,
    ) -> Result<&mut Self> {
        let info = vk::DescriptorBufferInfo::default()
            .buffer(buffer.handle())
            .offset(offset)
            .range(vk::WHOLE_SIZE);
        self.write_buffer(name, info)
    }

    /// Queue a sampled-image write for a managed image and sampler.
    pub fn write_sampled_image(
        &mut self,
        name: &str,
        image: &ManagedImage,
        sampler: &ManagedSampler,
        layout: vk::ImageLayout,
    ) -> Result<&mut Self> {
        let info = vk::DescriptorImageInfo::default()
            .sampler(sampler.handle())
            .image_view(image.view())
            .image_layout(layout);
        self.write_image(name, info)
    }

    /// Queue a storage-image write (no sampler).
    pub fn write_storage_image(
        &mut self,
        name: &str,
        image: &ManagedImage,
        layout: vk::ImageLayout,
    ) -> Result<&mut Self> {
        let info = vk::DescriptorImageInfo::default()
            .image_view(image.view())
            .image_layout(layout);
        self.write_image(name, info)
    }

    /// Flush all queued writes in one call and clear the writer for reuse.
    pub fn update(&mut self) {
        let mut writes: Vec<vk::WriteDescriptorSet> = Vec::new();

        for bw in &self.buffer_writes {
            if bw.infos.is_empty() {
                continue;
            }
            let count = (bw.max_count as usize).min(bw.infos.len());
            let tail = &bw.infos[bw.infos.len() - count..];
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(bw.binding)
                    .dst_array_element(0)
                    .descriptor_type(bw.descriptor_type)
                    .buffer_info(tail),
            );
        }

        for iw in &self.image_writes {
            if iw.infos.is_empty() {
                continue;
            }
            let count = (iw.max_count as usize).min(iw.infos.len());
            let tail = &iw.infos[iw.infos.len() - count..];
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(iw.binding)
                    .dst_array_element(0)
                    .descriptor_type(iw.descriptor_type)
                    .image_info(tail),
            );
        }

        if !writes.is_empty() {
            unsafe {
                self.device.update_descriptor_sets(&writes, &[]);
            }
        }
        drop(writes);

        self.buffer_writes.clear();
        self.image_writes.clear();
    }

    fn buffer_write_slot(&mut self, binding: &DescriptorBindingInfo) -> &mut BufferWrite {
        if let Some(i) = self.buffer_writes.iter().position(|w| w.binding == binding.binding) {
            return &mut self.buffer_writes[i];
        }
        self.buffer_writes.push(BufferWrite {
            binding: binding.binding,
            descriptor_type: binding.descriptor_type,
            max_count: binding.descriptor_count,
            infos: Vec::new(),
        });
        self.buffer_writes.last_mut().expect("write was just pushed")
    }

    fn image_write_slot(&mut self, binding: &DescriptorBindingInfo) -> &mut ImageWrite {
        if let Some(i) = self.image_writes.iter().position(|w| w.binding == binding.binding) {
            return &mut self.image_writes[i];
        }
        self.image_writes.push(ImageWrite {
            binding: binding.binding,
            descriptor_type: binding.descriptor_type,
            max_count: binding.descriptor_count,
            infos: Vec::new(),
        });
        self.image_writes.last_mut().expect("write was just pushed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(name: &str, index: u32, ty: vk::DescriptorType, count: u32) -> DescriptorBindingInfo {
        DescriptorBindingInfo {
            name: name.to_string(),
            binding: index,
            descriptor_type: ty,
            descriptor_count: count,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
        }
    }

    #[test]
    fn binding_structure_ignores_name() {
        let a = binding("albedo", 1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1);
        let b = binding("base_color", 1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1);
        assert_eq!(BindingStructure::from(&a), BindingStructure::from(&b));
    }

    #[test]
    fn layout_key_equality_is_structural() {
        let bindings_a = vec![
            binding("camera", 0, vk::DescriptorType::UNIFORM_BUFFER, 1),
            binding("albedo", 1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1),
        ];
        let bindings_b = vec![
            binding("view", 0, vk::DescriptorType::UNIFORM_BUFFER, 1),
            binding("tex", 1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1),
        ];

        let key_a = LayoutKey {
            set_index: 0,
            bindings: bindings_a.iter().map(BindingStructure::from).collect(),
        };
        let key_b = LayoutKey {
            set_index: 0,
            bindings: bindings_b.iter().map(BindingStructure::from).collect(),
        };
        assert!(key_a == key_b);

        let key_c = LayoutKey {
            set_index: 1,
            bindings: bindings_a.iter().map(BindingStructure::from).collect(),
        };
        assert!(key_a != key_c);
    }

    #[test]
    fn structure_match_detects_count_changes() {
        let a = vec![binding("tex", 0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1)];
        let b = vec![binding("tex", 0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 2)];
        assert!(!structure_matches(&a, &b));
        assert!(structure_matches(&a, &a));
    }

    #[test]
    fn keep_last_truncates_from_the_front() {
        let values = [1u32, 2, 3, 4, 5, 6];
        assert_eq!(keep_last(&values, 4), vec![3, 4, 5, 6]);
        assert_eq!(keep_last(&values, 6), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(keep_last(&values, 8), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn layout_cache_dedupes_by_structure() {
        let ctx = crate::GpuContextBuilder::new()
            .app_name("prism-gpu-test")
            .validation(true)
            .build()
            .unwrap();
        let cache = DescriptorLayoutCache::new(ctx.device().clone());

        let bindings = vec![binding("camera", 0, vk::DescriptorType::UNIFORM_BUFFER, 1)];
        let first = cache.register_set_layout("frame", 0, &bindings).unwrap();
        let renamed = vec![binding("view_data", 0, vk::DescriptorType::UNIFORM_BUFFER, 1)];
        let second = cache.register_set_layout("other", 0, &renamed).unwrap();

        // Same structure, different name: one shared schema.
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.layout(), cache.layout("other", 0).unwrap());

        // Same name, different structure: rejected.
        let conflicting = vec![binding("camera", 0, vk::DescriptorType::UNIFORM_BUFFER, 2)];
        let err = cache.register_set_layout("frame", 0, &conflicting).unwrap_err();
        assert!(matches!(err, GpuError::IncompatibleSchema(_)));

        cache.cleanup();
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn writer_commits_the_last_declared_count_entries() {
        use crate::resource::{BufferDesc, BufferUsage, MemoryMode};

        let ctx = crate::GpuContextBuilder::new()
            .app_name("prism-gpu-test")
            .validation(true)
            .build()
            .unwrap();
        let cache = DescriptorLayoutCache::new(ctx.device().clone());
        let pool = DescriptorPoolAllocator::new(ctx.device().clone());

        let schema = cache
            .register_set_layout(
                "truncation",
                0,
                &[binding("data", 0, vk::DescriptorType::UNIFORM_BUFFER, 4)],
            )
            .unwrap();
        let set = pool.allocate_one(&schema).unwrap();

        let buffers: Vec<_> = (0..6)
            .map(|i| {
                ctx.allocator()
                    .create_buffer(&BufferDesc {
                        size: 64,
                        usage: BufferUsage::UNIFORM,
                        memory: MemoryMode::CpuToGpu,
                        debug_name: format!("truncation_{i}"),
                    })
                    .unwrap()
            })
            .collect();
        let infos: Vec<vk::DescriptorBufferInfo> = buffers
            .iter()
            .map(|b| {
                vk::DescriptorBufferInfo::default()
                    .buffer(b.handle())
                    .range(vk::WHOLE_SIZE)
            })
            .collect();

        let mut writer = DescriptorSetWriter::begin(ctx.device(), schema.clone(), set);
        writer.write_buffers("data", &infos).unwrap();

        // Six entries against a count-4 binding keep the last four, in order.
        assert_eq!(writer.buffer_writes[0].infos.len(), 4);
        assert_eq!(writer.buffer_writes[0].infos[0].buffer, buffers[2].handle());
        assert_eq!(writer.buffer_writes[0].infos[3].buffer, buffers[5].handle());

        writer.update();
        assert!(writer.buffer_writes.is_empty());

        // A missing binding name is a hard error.
        assert!(matches!(
            writer.write_buffers("missing", &infos).unwrap_err(),
            GpuError::NotFound(_)
        ));

        drop(buffers);
        pool.cleanup();
        cache.cleanup();
    }
}
