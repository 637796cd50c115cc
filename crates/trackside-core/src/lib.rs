//! Trackside Core
//!
//! Shared building blocks for the Trackside renderer: geometry, logging and
//! profiling setup, renderer configuration, and the contracts the renderer
//! consumes (the GPU device, sprite data and palettes).

pub mod config;
pub mod geometry;
pub mod gpu;
pub mod logging;
pub mod palette;
pub mod profiling;
pub mod sprite;
