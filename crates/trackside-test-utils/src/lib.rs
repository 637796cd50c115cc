//! Test utilities for the Trackside renderer.
//!
//! # Overview
//!
//! - `MockRenderDevice` - software implementation of
//!   [`RenderDevice`](trackside_core::gpu::RenderDevice) that records every
//!   call and executes draws on CPU-side textures (requires `mock` feature)
//! - [`StubSprites`] - in-memory sprite table that counts decode calls
//! - [`StubPalette`] - in-memory remap and blend tables
//!
//! # Example
//!
//! ```rust
//! # #[cfg(feature = "mock")]
//! # {
//! use trackside_core::gpu::{RenderDevice, TextureDescriptor, TextureFormat};
//! use trackside_test_utils::MockRenderDevice;
//!
//! let mock = MockRenderDevice::new();
//! let texture = mock.create_texture(&TextureDescriptor::new_2d(
//!     "target",
//!     4,
//!     4,
//!     TextureFormat::R8Uint,
//! ));
//! mock.clear_color(texture, 7);
//!
//! assert_eq!(mock.pixel(texture, 1, 1), Some(7));
//! assert_eq!(mock.count_texture_creates(), 1);
//! # }
//! ```
//!
//! # Interior Mutability
//!
//! The device contract takes `&self`, so the mock keeps its state behind
//! `parking_lot::Mutex`es. This keeps it `Send + Sync` and lets one instance
//! be shared through an `Arc` between the code under test and the assertions.

#[cfg(feature = "mock")]
pub mod mock_device;
pub mod stubs;

#[cfg(feature = "mock")]
pub use mock_device::*;
pub use stubs::*;
