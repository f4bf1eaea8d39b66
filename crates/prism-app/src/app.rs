//! `PrismApp` trait definition.

use crate::context::AppContext;
use crate::frame::FrameContext;
use winit::event::WindowEvent;

/// Trait for Prism applications.
///
/// The framework creates the window, GPU context, and swapchain, drives the
/// event loop, and handles per-frame synchronization, submission, and
/// presentation. The application records rendering commands.
pub trait PrismApp: Sized {
    /// Initialize the application. Called once after the GPU context and
    /// window exist.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state. Called every frame before rendering with
    /// the delta time in seconds.
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Record rendering commands for one frame. The command buffer in the
    /// frame context is already in the recording state; the framework ends,
    /// submits, and presents it.
    fn render(&mut self, ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()>;

    /// Handle window resize. The swapchain has already been recreated.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle a window event. Return `true` to stop further processing.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Release resources before shutdown. The GPU is idle when called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
