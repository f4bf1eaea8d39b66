//! One-shot GPU transfer engine.
//!
//! Uploads, buffer copies, layout transitions, and mipmap generation are
//! recorded into transient command buffers and submitted with a fence each.
//! Callers get back a [`TransferToken`] they can poll or wait on.
//!
//! Every thread that issues transfers owns its own command pools, staging
//! buffer pool, and submission records. The engine only takes a process-wide
//! lock to register a new thread's state (and to tear everything down) and a
//! short queue lock around `vkQueueSubmit`, which requires external
//! synchronization.

use crate::barrier::{self, ImageLayoutTransition};
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::resource::{BufferDesc, BufferUsage, ManagedBuffer, ManagedImage, MemoryMode, ResourceAllocator};
use ash::vk;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Transfer engine configuration.
#[derive(Debug, Clone)]
pub struct TransferEngineConfig {
    /// Reuse staging buffers across transfers.
    pub pool_enabled: bool,
    /// Upper bound on pooled staging buffers per thread.
    pub max_pooled_buffers: usize,
    /// Smallest staging buffer the pool will allocate.
    pub min_buffer_size: vk::DeviceSize,
    /// Largest pooled staging buffer; requests beyond this get an exact-size
    /// buffer.
    pub max_buffer_size: vk::DeviceSize,
}

impl Default for TransferEngineConfig {
    fn default() -> Self {
        Self {
            pool_enabled: true,
            max_pooled_buffers: 8,
            min_buffer_size: 1024 * 1024,
            max_buffer_size: 64 * 1024 * 1024,
        }
    }
}

struct TokenState {
    fence: vk::Fence,
    device: ash::Device,
    completed: AtomicBool,
}

impl std::fmt::Debug for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenState")
            .field("fence", &self.fence)
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}

/// Completion handle for a submitted transfer.
///
/// Tokens are cheap to clone and share one fence-backed state. A token is
/// always either already completed or referencing a live fence; the engine
/// recycles a fence only once no token for it is held outside the engine.
#[derive(Clone, Debug)]
pub struct TransferToken {
    state: Arc<TokenState>,
}

impl TransferToken {
    /// Block until the transfer completes or the timeout elapses.
    ///
    /// Returns `Ok(true)` once the fence has signaled and `Ok(false)` if the
    /// timeout elapsed first. Fence-wait failures surface as errors.
    pub fn wait(&self, timeout_ns: u64) -> Result<bool> {
        if self.state.completed.load(Ordering::Acquire) {
            return Ok(true);
        }
        match unsafe {
            self.state
                .device
                .wait_for_fences(&[self.state.fence], true, timeout_ns)
        } {
            Ok(()) => {
                self.state.completed.store(true, Ordering::Release);
                Ok(true)
            }
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(GpuError::Vulkan(e)),
        }
    }

    /// Non-blocking completion check.
    pub fn is_complete(&self) -> bool {
        if self.state.completed.load(Ordering::Acquire) {
            return true;
        }
        let signaled =
            unsafe { self.state.device.get_fence_status(self.state.fence) }.unwrap_or(false);
        if signaled {
            self.state.completed.store(true, Ordering::Release);
        }
        signaled
    }
}

/// Queue used for a one-shot submission.
#[derive(Clone, Copy, PartialEq, Eq)]
enum QueueKind {
    Transfer,
    /// Required for blits and barriers whose stages exceed what a transfer
    /// queue may touch.
    Graphics,
}

struct StagingEntry {
    buffer: ManagedBuffer,
    in_use: bool,
}

struct PendingSubmission {
    token: Arc<TokenState>,
    cmd: vk::CommandBuffer,
    pool: vk::CommandPool,
    staging_indices: Vec<usize>,
}

struct ThreadState {
    transfer_pool: vk::CommandPool,
    graphics_pool: vk::CommandPool,
    staging: Vec<StagingEntry>,
    active: Vec<PendingSubmission>,
    fence_pool: Vec<vk::Fence>,
}

struct ThreadSlot {
    state: Mutex<ThreadState>,
}

static NEXT_ENGINE_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static THREAD_SLOTS: RefCell<HashMap<usize, Arc<ThreadSlot>>> = RefCell::new(HashMap::new());
}

/// Size the pool allocates for a staging request: at least the request,
/// rounded up to the configured minimum and capped by the configured maximum
/// (never below the request itself).
fn staging_allocation_size(requested: vk::DeviceSize, config: &TransferEngineConfig) -> vk::DeviceSize {
    let mut size = requested.max(config.min_buffer_size);
    if config.max_buffer_size > 0 {
        size = requested.max(size.min(config.max_buffer_size));
    }
    size
}

/// One-shot transfer engine. See the module docs for the threading model.
pub struct TransferEngine {
    device: ash::Device,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    allocator: ResourceAllocator,
    graphics_queue: vk::Queue,
    transfer_queue: vk::Queue,
    graphics_family: u32,
    transfer_family: u32,
    config: TransferEngineConfig,
    id: usize,
    registry: Mutex<Vec<Arc<ThreadSlot>>>,
    queue_lock: Mutex<()>,
}

impl TransferEngine {
    /// Create a transfer engine bound to the context's queues.
    pub fn new(ctx: &GpuContext, allocator: ResourceAllocator, config: TransferEngineConfig) -> Self {
        Self {
            device: ctx.device().clone(),
            instance: ctx.instance().clone(),
            physical_device: ctx.physical_device(),
            allocator,
            graphics_queue: ctx.graphics_queue(),
            transfer_queue: ctx.transfer_queue(),
            graphics_family: ctx.graphics_queue_family(),
            transfer_family: ctx.transfer_queue_family(),
            config,
            id: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
            registry: Mutex::new(Vec::new()),
            queue_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &TransferEngineConfig {
        &self.config
    }

    /// Upload bytes into a buffer through a pooled staging buffer.
    /// Submitted on the transfer queue.
    pub fn upload_to_buffer(
        &self,
        dst: &ManagedBuffer,
        data: &[u8],
        dst_offset: vk::DeviceSize,
    ) -> Result<TransferToken> {
        if data.is_empty() {
            return Err(GpuError::InvalidArgument("upload of zero bytes".to_string()));
        }
        check_buffer_range(dst, dst_offset, data.len() as vk::DeviceSize)?;

        self.with_thread_state(|state| {
            let staging_index = self.acquire_staging_buffer(state, data.len() as vk::DeviceSize)?;
            state.staging[staging_index].buffer.write_bytes(0, data)?;

            let cmd = self.begin_one_time(state, QueueKind::Transfer)?;
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset,
                size: data.len() as vk::DeviceSize,
            };
            unsafe {
                self.device.cmd_copy_buffer(
                    cmd,
                    state.staging[staging_index].buffer.handle(),
                    dst.handle(),
                    &[region],
                );
            }
            let token = self.end_one_time(state, cmd, QueueKind::Transfer, vec![staging_index])?;
            self.cleanup_unused_staging(state);
            Ok(token)
        })
    }

    /// Upload pixel data into one subresource of an image. The image is
    /// transitioned Undefined → TransferDst → ShaderReadOnly around the copy.
    /// Submitted on the graphics queue, which is required for the
    /// shader-read barrier stage.
    #[allow(clippy::too_many_arguments)]
    pub fn upload_to_image(
        &self,
        dst: &ManagedImage,
        data: &[u8],
        width: u32,
        height: u32,
        depth: u32,
        mip_level: u32,
        array_layer: u32,
    ) -> Result<TransferToken> {
        if data.is_empty() {
            return Err(GpuError::InvalidArgument("upload of zero bytes".to_string()));
        }

        self.with_thread_state(|state| {
            let staging_index = self.acquire_staging_buffer(state, data.len() as vk::DeviceSize)?;
            state.staging[staging_index].buffer.write_bytes(0, data)?;

            let cmd = self.begin_one_time(state, QueueKind::Graphics)?;
            self.record_buffer_to_image(
                cmd,
                state.staging[staging_index].buffer.handle(),
                dst,
                width,
                height,
                depth,
                mip_level,
                array_layer,
            );
            let token = self.end_one_time(state, cmd, QueueKind::Graphics, vec![staging_index])?;
            self.cleanup_unused_staging(state);
            Ok(token)
        })
    }

    /// Copy a range between two buffers on the transfer queue.
    pub fn copy_buffer(
        &self,
        src: &ManagedBuffer,
        dst: &ManagedBuffer,
        size: vk::DeviceSize,
        src_offset: vk::DeviceSize,
        dst_offset: vk::DeviceSize,
    ) -> Result<TransferToken> {
        if size == 0 {
            return Err(GpuError::InvalidArgument("copy of zero bytes".to_string()));
        }
        check_buffer_range(src, src_offset, size)?;
        check_buffer_range(dst, dst_offset, size)?;

        self.with_thread_state(|state| {
            let cmd = self.begin_one_time(state, QueueKind::Transfer)?;
            let region = vk::BufferCopy {
                src_offset,
                dst_offset,
                size,
            };
            unsafe {
                self.device
                    .cmd_copy_buffer(cmd, src.handle(), dst.handle(), &[region]);
            }
            self.end_one_time(state, cmd, QueueKind::Transfer, Vec::new())
        })
    }

    /// Copy a buffer into one image subresource, with the same barriers as
    /// [`Self::upload_to_image`]. Graphics queue.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_buffer_to_image(
        &self,
        src: &ManagedBuffer,
        dst: &ManagedImage,
        width: u32,
        height: u32,
        depth: u32,
        mip_level: u32,
        array_layer: u32,
    ) -> Result<TransferToken> {
        self.with_thread_state(|state| {
            let cmd = self.begin_one_time(state, QueueKind::Graphics)?;
            self.record_buffer_to_image(cmd, src.handle(), dst, width, height, depth, mip_level, array_layer);
            self.end_one_time(state, cmd, QueueKind::Graphics, Vec::new())
        })
    }

    /// Synchronously write into a host-visible uniform buffer.
    ///
    /// The caller must guarantee the device is not reading the range, which
    /// per-frame buffers gated by the frame fence provide naturally.
    pub fn write_to_uniform_buffer(
        &self,
        dst: &ManagedBuffer,
        data: &[u8],
        dst_offset: vk::DeviceSize,
    ) -> Result<()> {
        check_buffer_range(dst, dst_offset, data.len() as vk::DeviceSize)?;
        dst.write_bytes(dst_offset, data)
    }

    /// Transition a subresource range between image layouts.
    ///
    /// Barriers whose derived stages go beyond transfer and top/bottom of
    /// pipe are submitted on the graphics queue; the caller can also force
    /// that with `use_graphics_queue`.
    #[allow(clippy::too_many_arguments)]
    pub fn transition_image_layout(
        &self,
        image: &ManagedImage,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        aspect_mask: vk::ImageAspectFlags,
        base_mip_level: u32,
        level_count: u32,
        base_array_layer: u32,
        layer_count: u32,
        use_graphics_queue: bool,
    ) -> Result<TransferToken> {
        let (_, src_stage) = barrier::layout_access_and_stage(old_layout);
        let (_, dst_stage) = barrier::layout_access_and_stage(new_layout);
        let transfer_only = vk::PipelineStageFlags::TOP_OF_PIPE
            | vk::PipelineStageFlags::BOTTOM_OF_PIPE
            | vk::PipelineStageFlags::TRANSFER;
        let requires_graphics = use_graphics_queue || !transfer_only.contains(src_stage | dst_stage);
        let kind = if requires_graphics {
            QueueKind::Graphics
        } else {
            QueueKind::Transfer
        };

        self.with_thread_state(|state| {
            let cmd = self.begin_one_time(state, kind)?;
            unsafe {
                barrier::cmd_transition_image(
                    &self.device,
                    cmd,
                    &ImageLayoutTransition {
                        image: image.handle(),
                        old_layout,
                        new_layout,
                        aspect_mask,
                        base_mip_level,
                        level_count,
                        base_array_layer,
                        layer_count,
                    },
                );
            }
            self.end_one_time(state, cmd, kind, Vec::new())
        })
    }

    /// Generate a full mip chain by repeated halving blits.
    ///
    /// Expects every level to be in TransferDstOptimal and leaves the whole
    /// chain in ShaderReadOnlyOptimal. Fails with `UnsupportedFormat` if the
    /// image format does not support linear-filtered blits.
    pub fn generate_mipmaps(
        &self,
        image: &ManagedImage,
        width: u32,
        height: u32,
        mip_levels: u32,
    ) -> Result<TransferToken> {
        let format_props = unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, image.format())
        };
        if !format_props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
        {
            return Err(GpuError::UnsupportedFormat(format!(
                "format {:?} does not support linear blitting for mipmaps",
                image.format()
            )));
        }

        self.with_thread_state(|state| {
            let cmd = self.begin_one_time(state, QueueKind::Graphics)?;

            let mut mip_width = width.max(1) as i32;
            let mut mip_height = height.max(1) as i32;

            for level in 1..mip_levels {
                let src_level = level - 1;
                unsafe {
                    barrier::cmd_transition_image(
                        &self.device,
                        cmd,
                        &ImageLayoutTransition {
                            image: image.handle(),
                            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            base_mip_level: src_level,
                            level_count: 1,
                            base_array_layer: 0,
                            layer_count: 1,
                        },
                    );
                }

                let next_width = (mip_width / 2).max(1);
                let next_height = (mip_height / 2).max(1);

                let blit = vk::ImageBlit::default()
                    .src_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .mip_level(src_level)
                            .base_array_layer(0)
                            .layer_count(1),
                    )
                    .src_offsets([
                        vk::Offset3D { x: 0, y: 0, z: 0 },
                        vk::Offset3D {
                            x: mip_width,
                            y: mip_height,
                            z: 1,
                        },
                    ])
                    .dst_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .mip_level(level)
                            .base_array_layer(0)
                            .layer_count(1),
                    )
                    .dst_offsets([
                        vk::Offset3D { x: 0, y: 0, z: 0 },
                        vk::Offset3D {
                            x: next_width,
                            y: next_height,
                            z: 1,
                        },
                    ]);

                unsafe {
                    self.device.cmd_blit_image(
                        cmd,
                        image.handle(),
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        image.handle(),
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[blit],
                        vk::Filter::LINEAR,
                    );

                    barrier::cmd_transition_image(
                        &self.device,
                        cmd,
                        &ImageLayoutTransition {
                            image: image.handle(),
                            old_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            base_mip_level: src_level,
                            level_count: 1,
                            base_array_layer: 0,
                            layer_count: 1,
                        },
                    );
                }

                mip_width = next_width;
                mip_height = next_height;
            }

            unsafe {
                barrier::cmd_transition_image(
                    &self.device,
                    cmd,
                    &ImageLayoutTransition {
                        image: image.handle(),
                        old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: mip_levels.saturating_sub(1),
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                );
            }

            self.end_one_time(state, cmd, QueueKind::Graphics, Vec::new())
        })
    }

    // ---- per-thread plumbing ----

    fn with_thread_state<R>(&self, f: impl FnOnce(&mut ThreadState) -> Result<R>) -> Result<R> {
        let slot = THREAD_SLOTS.with(|slots| -> Result<Arc<ThreadSlot>> {
            let mut slots = slots.borrow_mut();
            if let Some(slot) = slots.get(&self.id) {
                return Ok(slot.clone());
            }
            let state = self.create_thread_state()?;
            let slot = Arc::new(ThreadSlot {
                state: Mutex::new(state),
            });
            self.registry.lock().push(slot.clone());
            slots.insert(self.id, slot.clone());
            Ok(slot)
        })?;

        let mut state = slot.state.lock();
        f(&mut state)
    }

    fn create_thread_state(&self) -> Result<ThreadState> {
        let flags = vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER;

        let transfer_pool = unsafe {
            self.device.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .queue_family_index(self.transfer_family)
                    .flags(flags),
                None,
            )?
        };
        let graphics_pool = unsafe {
            self.device.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .queue_family_index(self.graphics_family)
                    .flags(flags),
                None,
            )?
        };

        Ok(ThreadState {
            transfer_pool,
            graphics_pool,
            staging: Vec::new(),
            active: Vec::new(),
            fence_pool: Vec::new(),
        })
    }

    fn acquire_staging_buffer(&self, state: &mut ThreadState, size: vk::DeviceSize) -> Result<usize> {
        if self.config.pool_enabled {
            for (i, entry) in state.staging.iter_mut().enumerate() {
                if !entry.in_use && entry.buffer.size() >= size {
                    entry.in_use = true;
                    return Ok(i);
                }
            }

            if state.staging.len() < self.config.max_pooled_buffers {
                let alloc_size = staging_allocation_size(size, &self.config);
                let buffer = self.create_staging_buffer(alloc_size)?;
                state.staging.push(StagingEntry { buffer, in_use: true });
                return Ok(state.staging.len() - 1);
            }
        }

        // Pool disabled or full: a one-shot entry of exactly the requested
        // size, reclaimed by the next cleanup pass.
        let buffer = self.create_staging_buffer(size)?;
        state.staging.push(StagingEntry { buffer, in_use: true });
        Ok(state.staging.len() - 1)
    }

    fn create_staging_buffer(&self, size: vk::DeviceSize) -> Result<ManagedBuffer> {
        self.allocator.create_buffer(&BufferDesc {
            size,
            usage: BufferUsage::STAGING_SRC,
            memory: MemoryMode::CpuToGpu,
            debug_name: "transfer_staging".to_string(),
        })
    }

    /// Shrink the staging pool back to the configured cap, dropping idle
    /// entries from the tail only so indices held by in-flight submissions
    /// stay valid.
    fn cleanup_unused_staging(&self, state: &mut ThreadState) {
        if !self.config.pool_enabled {
            return;
        }
        while state.staging.len() > self.config.max_pooled_buffers {
            match state.staging.last() {
                Some(entry) if !entry.in_use => {
                    state.staging.pop();
                }
                _ => break,
            }
        }
    }

    fn begin_one_time(&self, state: &ThreadState, kind: QueueKind) -> Result<vk::CommandBuffer> {
        let pool = match kind {
            QueueKind::Transfer => state.transfer_pool,
            QueueKind::Graphics => state.graphics_pool,
        };
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { self.device.allocate_command_buffers(&alloc_info)?[0] };

        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device.begin_command_buffer(cmd, &begin_info)?;
        }
        Ok(cmd)
    }

    fn end_one_time(
        &self,
        state: &mut ThreadState,
        cmd: vk::CommandBuffer,
        kind: QueueKind,
        staging_indices: Vec<usize>,
    ) -> Result<TransferToken> {
        unsafe {
            self.device.end_command_buffer(cmd)?;
        }

        self.recycle_completed(state);

        let fence = match state.fence_pool.pop() {
            Some(fence) => fence,
            None => unsafe {
                self.device
                    .create_fence(&vk::FenceCreateInfo::default(), None)?
            },
        };

        let queue = match kind {
            QueueKind::Transfer => self.transfer_queue,
            QueueKind::Graphics => self.graphics_queue,
        };

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        {
            let _guard = self.queue_lock.lock();
            unsafe {
                self.device.queue_submit(queue, &[submit_info], fence)?;
            }
        }

        let token = Arc::new(TokenState {
            fence,
            device: self.device.clone(),
            completed: AtomicBool::new(false),
        });

        state.active.push(PendingSubmission {
            token: token.clone(),
            cmd,
            pool: match kind {
                QueueKind::Transfer => state.transfer_pool,
                QueueKind::Graphics => state.graphics_pool,
            },
            staging_indices,
        });

        Ok(TransferToken { state: token })
    }

    /// Reclaim finished submissions: recycle the fence, free the command
    /// buffer, and release staging entries. A submission is reclaimed only
    /// once its fence has signaled and no external token still references it.
    fn recycle_completed(&self, state: &mut ThreadState) {
        let mut i = 0;
        while i < state.active.len() {
            let record = &state.active[i];
            let signaled = record.token.completed.load(Ordering::Acquire)
                || unsafe { self.device.get_fence_status(record.token.fence) }.unwrap_or(false);
            if signaled {
                record.token.completed.store(true, Ordering::Release);
            }

            if signaled && Arc::strong_count(&record.token) == 1 {
                let record = state.active.swap_remove(i);
                unsafe {
                    if self.device.reset_fences(&[record.token.fence]).is_ok() {
                        state.fence_pool.push(record.token.fence);
                    } else {
                        self.device.destroy_fence(record.token.fence, None);
                    }
                    self.device.free_command_buffers(record.pool, &[record.cmd]);
                }
                for index in record.staging_indices {
                    if let Some(entry) = state.staging.get_mut(index) {
                        entry.in_use = false;
                    }
                }
            } else {
                i += 1;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: &ManagedImage,
        width: u32,
        height: u32,
        depth: u32,
        mip_level: u32,
        array_layer: u32,
    ) {
        let subresource = ImageLayoutTransition {
            image: dst.handle(),
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            aspect_mask: dst.aspect_mask(),
            base_mip_level: mip_level,
            level_count: 1,
            base_array_layer: array_layer,
            layer_count: 1,
        };

        unsafe {
            barrier::cmd_transition_image(&self.device, cmd, &subresource);

            let region = vk::BufferImageCopy::default()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(dst.aspect_mask())
                        .mip_level(mip_level)
                        .base_array_layer(array_layer)
                        .layer_count(1),
                )
                .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .image_extent(vk::Extent3D {
                    width,
                    height,
                    depth,
                });

            self.device.cmd_copy_buffer_to_image(
                cmd,
                src,
                dst.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            barrier::cmd_transition_image(
                &self.device,
                cmd,
                &ImageLayoutTransition {
                    old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    ..subresource
                },
            );
        }
    }
}

impl Drop for TransferEngine {
    fn drop(&mut self) {
        let slots = std::mem::take(&mut *self.registry.lock());
        for slot in &slots {
            let mut state = slot.state.lock();

            let fences: Vec<vk::Fence> = state.active.iter().map(|r| r.token.fence).collect();
            if !fences.is_empty() {
                unsafe {
                    if let Err(e) = self.device.wait_for_fences(&fences, true, u64::MAX) {
                        tracing::warn!("Failed to wait for in-flight transfers on shutdown: {e}");
                    }
                }
            }

            for record in state.active.drain(..) {
                record.token.completed.store(true, Ordering::Release);
                unsafe {
                    self.device.free_command_buffers(record.pool, &[record.cmd]);
                    self.device.destroy_fence(record.token.fence, None);
                }
            }
            for fence in state.fence_pool.drain(..) {
                unsafe {
                    self.device.destroy_fence(fence, None);
                }
            }

            // Staging buffers return their memory through the allocator.
            state.staging.clear();

            unsafe {
                self.device.destroy_command_pool(state.transfer_pool, None);
                self.device.destroy_command_pool(state.graphics_pool, None);
            }
        }
    }
}

fn check_buffer_range(buffer: &ManagedBuffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<()> {
    let buffer_size = buffer.size();
    if offset >= buffer_size {
        return Err(GpuError::OutOfRange(format!(
            "offset {offset} exceeds buffer '{}' size {buffer_size}",
            buffer.debug_name()
        )));
    }
    if size > buffer_size - offset {
        return Err(GpuError::OutOfRange(format!(
            "{size} bytes at offset {offset} exceed buffer '{}' size {buffer_size}",
            buffer.debug_name()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_size_rounds_up_to_minimum() {
        let config = TransferEngineConfig::default();
        assert_eq!(staging_allocation_size(16, &config), config.min_buffer_size);
    }

    #[test]
    fn staging_size_caps_at_maximum() {
        let config = TransferEngineConfig {
            min_buffer_size: 1024,
            max_buffer_size: 4096,
            ..Default::default()
        };
        assert_eq!(staging_allocation_size(2048, &config), 2048);
        // A pooled entry never exceeds the cap unless the request itself does.
        assert_eq!(staging_allocation_size(8192, &config), 8192);
        assert_eq!(staging_allocation_size(100, &config), 1024);
    }

    #[test]
    fn staging_size_ignores_zero_cap() {
        let config = TransferEngineConfig {
            min_buffer_size: 1024,
            max_buffer_size: 0,
            ..Default::default()
        };
        assert_eq!(staging_allocation_size(100, &config), 1024);
        assert_eq!(staging_allocation_size(1 << 20, &config), 1 << 20);
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn upload_roundtrip_and_token_completion() {
        let ctx = crate::GpuContextBuilder::new()
            .app_name("prism-gpu-test")
            .validation(true)
            .build()
            .unwrap();
        let engine = TransferEngine::new(&ctx, ctx.allocator().clone(), TransferEngineConfig::default());

        let dst = ctx
            .allocator()
            .create_buffer(&BufferDesc {
                size: 256,
                usage: BufferUsage::STORAGE | BufferUsage::TRANSFER_DST,
                memory: MemoryMode::GpuOnly,
                debug_name: "upload_dst".to_string(),
            })
            .unwrap();

        let payload = vec![0xA5u8; 128];
        let token = engine.upload_to_buffer(&dst, &payload, 64).unwrap();
        assert!(token.wait(u64::MAX).unwrap());
        assert!(token.is_complete());

        // Range violations are rejected before anything is recorded.
        let err = engine.upload_to_buffer(&dst, &payload, 256).unwrap_err();
        assert!(matches!(err, GpuError::OutOfRange(_)));
        let err = engine.upload_to_buffer(&dst, &vec![0u8; 512], 0).unwrap_err();
        assert!(matches!(err, GpuError::OutOfRange(_)));

        drop(dst);
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn mipmap_generation_rejects_non_blittable_formats() {
        use crate::resource::{ImageDesc, ImageUsage};

        let ctx = crate::GpuContextBuilder::new()
            .app_name("prism-gpu-test")
            .validation(true)
            .build()
            .unwrap();
        let engine = TransferEngine::new(&ctx, ctx.allocator().clone(), TransferEngineConfig::default());

        // Integer formats never advertise linear sampled-image filtering.
        let image = ctx
            .allocator()
            .create_image(
                &ImageDesc {
                    width: 64,
                    height: 64,
                    mip_levels: 7,
                    format: vk::Format::R32_UINT,
                    usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_SRC | ImageUsage::TRANSFER_DST,
                    debug_name: "mipmap_reject".to_string(),
                    ..Default::default()
                },
                vk::ImageAspectFlags::COLOR,
            )
            .unwrap();

        let err = engine.generate_mipmaps(&image, 64, 64, 7).unwrap_err();
        assert!(matches!(err, GpuError::UnsupportedFormat(_)));
    }
}
