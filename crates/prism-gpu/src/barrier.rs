//! Image layout transitions.
//!
//! The access-mask/stage table here is shared by the transfer engine and the
//! frame orchestrator so both derive barriers from the same rules.

use ash::vk;

/// Parameters for a single image layout transition.
#[derive(Clone, Copy)]
pub struct ImageLayoutTransition {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub aspect_mask: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
}

impl ImageLayoutTransition {
    /// Whole-image color transition with a single mip and layer.
    pub fn color(image: vk::Image, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        Self {
            image,
            old_layout,
            new_layout,
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

/// Access mask and pipeline stage implied by an image layout.
pub fn layout_access_and_stage(layout: vk::ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        vk::ImageLayout::GENERAL => (
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::COMPUTE_SHADER,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER)
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
            (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER)
        }
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER)
        }
        vk::ImageLayout::PRESENT_SRC_KHR => {
            (vk::AccessFlags::empty(), vk::PipelineStageFlags::BOTTOM_OF_PIPE)
        }
        _ => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
    }
}

/// Record an image layout transition barrier into a command buffer.
///
/// # Safety
/// The device and command buffer must be valid and the command buffer must be
/// in the recording state.
pub unsafe fn cmd_transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    transition: &ImageLayoutTransition,
) {
    let (src_access, src_stage) = layout_access_and_stage(transition.old_layout);
    let (dst_access, dst_stage) = layout_access_and_stage(transition.new_layout);

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(transition.old_layout)
        .new_layout(transition.new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(transition.image)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(transition.aspect_mask)
                .base_mip_level(transition.base_mip_level)
                .level_count(transition.level_count)
                .base_array_layer(transition.base_array_layer)
                .layer_count(transition.layer_count),
        );

    device.cmd_pipeline_barrier(
        cmd,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_has_no_access() {
        let (access, stage) = layout_access_and_stage(vk::ImageLayout::UNDEFINED);
        assert_eq!(access, vk::AccessFlags::empty());
        assert_eq!(stage, vk::PipelineStageFlags::TOP_OF_PIPE);
    }

    #[test]
    fn transfer_layouts_stay_on_transfer_stage() {
        let (access, stage) = layout_access_and_stage(vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(stage, vk::PipelineStageFlags::TRANSFER);

        let (access, stage) = layout_access_and_stage(vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(access, vk::AccessFlags::TRANSFER_READ);
        assert_eq!(stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn shader_read_targets_fragment_stage() {
        let (access, stage) = layout_access_and_stage(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(access, vk::AccessFlags::SHADER_READ);
        assert_eq!(stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn present_src_is_bottom_of_pipe() {
        let (access, stage) = layout_access_and_stage(vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(access, vk::AccessFlags::empty());
        assert_eq!(stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }
}
