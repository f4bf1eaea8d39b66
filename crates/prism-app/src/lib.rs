//! Windowed application framework for the Prism engine.
//!
//! Wraps winit's event loop, swapchain acquire/submit/present, and per-frame
//! synchronization so applications only implement [`PrismApp`].

pub mod app;
pub mod context;
pub mod frame;
pub mod runner;

pub use app::PrismApp;
pub use context::{AppContext, FRAMES_IN_FLIGHT};
pub use frame::FrameContext;
pub use runner::{run_app, AppConfig};
