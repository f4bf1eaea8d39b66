//! Declarative render pass definitions.
//!
//! A pass names its attachments and resources; the orchestrator resolves the
//! names against the swapchain or the registered render targets at record
//! time (dynamic rendering).

use crate::error::{RenderError, Result};
use ash::vk;

/// Attachment categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentType {
    Color,
    DepthStencil,
}

/// One attachment binding of a pass.
///
/// `resource_name` refers to a registered render target, or the reserved
/// swapchain name (by default "Swapchain") for the current frame's swapchain
/// image.
#[derive(Clone)]
pub struct RenderAttachment {
    pub attachment_type: AttachmentType,
    pub resource_name: String,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: Option<vk::ClearValue>,
}

impl Default for RenderAttachment {
    fn default() -> Self {
        Self {
            attachment_type: AttachmentType::Color,
            resource_name: String::new(),
            format: vk::Format::UNDEFINED,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: None,
        }
    }
}

/// Declared inputs and outputs of a pass.
#[derive(Clone, Default)]
pub struct RenderPassIo {
    /// Color attachments written by the pass.
    pub color_outputs: Vec<RenderAttachment>,
    /// Optional depth/stencil attachment.
    pub depth_stencil_output: Option<RenderAttachment>,
    /// Read-only sampled image names (e.g. a previous pass's output).
    pub sampled_images: Vec<String>,
    /// Storage image names read or written by the pass.
    pub storage_images: Vec<String>,
    /// Read-only buffer names.
    pub buffer_inputs: Vec<String>,
    /// Writable buffer names.
    pub buffer_outputs: Vec<String>,
}

/// A complete pass declaration.
#[derive(Clone, Default)]
pub struct RenderPassDefinition {
    /// Unique within a sequence.
    pub name: String,
    /// Shader prefix for program, schema, and layout lookups.
    pub shader_prefix: String,
    pub resources: RenderPassIo,
    /// Render area; zero means "use the current swapchain extent".
    pub render_extent: vk::Extent2D,
}

/// Ordered pass list with unique names.
#[derive(Clone, Default)]
pub struct RenderPassSequence {
    passes: Vec<RenderPassDefinition>,
}

impl RenderPassSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pass; a duplicate name is an error.
    pub fn add_pass(&mut self, pass: RenderPassDefinition) -> Result<()> {
        if self.passes.iter().any(|p| p.name == pass.name) {
            return Err(RenderError::InvalidArgument(format!(
                "render pass '{}' already exists",
                pass.name
            )));
        }
        self.passes.push(pass);
        Ok(())
    }

    /// Passes in declaration order.
    pub fn passes(&self) -> &[RenderPassDefinition] {
        &self.passes
    }

    /// Find a pass by name.
    pub fn find_pass(&self, name: &str) -> Option<&RenderPassDefinition> {
        self.passes.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(name: &str) -> RenderPassDefinition {
        RenderPassDefinition {
            name: name.to_string(),
            shader_prefix: "forward".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn passes_keep_declaration_order() {
        let mut sequence = RenderPassSequence::new();
        sequence.add_pass(pass("shadow")).unwrap();
        sequence.add_pass(pass("forward")).unwrap();
        sequence.add_pass(pass("post")).unwrap();

        let names: Vec<&str> = sequence.passes().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["shadow", "forward", "post"]);
    }

    #[test]
    fn duplicate_pass_names_are_rejected() {
        let mut sequence = RenderPassSequence::new();
        sequence.add_pass(pass("forward")).unwrap();
        let err = sequence.add_pass(pass("forward")).unwrap_err();
        assert!(matches!(err, RenderError::InvalidArgument(_)));
    }

    #[test]
    fn find_pass_by_name() {
        let mut sequence = RenderPassSequence::new();
        sequence.add_pass(pass("forward")).unwrap();
        assert!(sequence.find_pass("forward").is_some());
        assert!(sequence.find_pass("missing").is_none());
    }
}
