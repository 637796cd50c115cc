//! Trackside Render
//!
//! Batched renderer for palette-indexed 2D scenes. Draw calls are recorded
//! into instance batches, images are cached in a layered texture atlas, and
//! translucent rectangles are resolved by depth peeling against the opaque
//! scene.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use trackside_core::config::Config;
//! use trackside_render::{DrawingEngine, WgpuRenderDevice};
//! use trackside_test_utils::{StubPalette, StubSprites};
//!
//! let device = Arc::new(WgpuRenderDevice::new_sync().expect("no GPU"));
//! let mut engine = DrawingEngine::new(
//!     device,
//!     Arc::new(StubSprites::new()),
//!     Arc::new(StubPalette::new()),
//!     640,
//!     480,
//!     Config::default(),
//! )
//! .expect("engine");
//!
//! engine.begin_draw().fill_rect(10, 0, 0, 99, 99);
//! let stats = engine.end_draw();
//! assert_eq!(stats.rects, 1);
//! ```
//!
//! # Modules
//!
//! - [`texture_cache`] - image, glyph and bitmap caching in atlas layers
//! - [`drawing_context`] - draw command recording and flushing
//! - [`swap_framebuffer`] - opaque, transparent and mix targets
//! - [`transparency`] - peel count estimation
//! - [`device`] - the wgpu implementation of the device contract

pub mod atlas;
pub mod command_batch;
pub mod context;
pub mod device;
pub mod drawing_context;
pub mod engine;
pub mod error;
mod pipeline;
pub mod render_target;
pub mod swap_framebuffer;
pub mod texture_cache;
pub mod transparency;

pub use context::{GraphicsContext, GraphicsContextDescriptor};
pub use device::WgpuRenderDevice;
pub use drawing_context::{DrawingContext, FlushStats, RenderView};
pub use engine::{DrawingEngine, FrameCapture};
pub use error::{GraphicsError, Result};
pub use render_target::RenderTarget;
pub use swap_framebuffer::SwapFramebuffer;
pub use texture_cache::TextureCache;
