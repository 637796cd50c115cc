//! GPU device contract.
//!
//! The renderer never talks to a graphics API directly. Every texture, buffer
//! and draw goes through [`RenderDevice`], which is implemented by the wgpu
//! backend in `trackside-render` and by the software mock in
//! `trackside-test-utils`.
//!
//! # Draw semantics
//!
//! Both implementations must agree on what a draw does to a render target:
//!
//! - a rect covers `[left, right) x [top, bottom)` intersected with its clip;
//! - texture coordinates are interpolated at pixel centres between the
//!   instance's normalized bounds, and a colour index of `0` is transparent;
//! - depth is [`depth_value`] of the instance's counter, opaque draws pass on
//!   *less* and transparent draws pass on *greater*;
//! - transparent targets store `(value, mode)` pairs which
//!   [`RenderDevice::apply_transparency`] resolves against the opaque target.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use thiserror::Error;

/// Opaque id of a texture owned by a [`RenderDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

/// Opaque id of a buffer owned by a [`RenderDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

/// Texture formats the renderer uses. Colour data is always palette indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// One palette index per pixel.
    R8Uint,
    /// Palette index plus a transparency mode.
    Rg8Uint,
    Depth32Float,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::R8Uint => 1,
            TextureFormat::Rg8Uint => 2,
            TextureFormat::Depth32Float => 4,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureDimension {
    D2,
    D2Array { layers: u32 },
}

impl TextureDimension {
    pub fn layers(self) -> u32 {
        match self {
            TextureDimension::D2 => 1,
            TextureDimension::D2Array { layers } => layers,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TextureDescriptor<'a> {
    pub label: Option<&'a str>,
    pub width: u32,
    pub height: u32,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
}

impl<'a> TextureDescriptor<'a> {
    pub fn new_2d(label: &'a str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: Some(label),
            width,
            height,
            dimension: TextureDimension::D2,
            format,
        }
    }

    pub fn new_array(label: &'a str, width: u32, height: u32, layers: u32, format: TextureFormat) -> Self {
        Self {
            label: Some(label),
            width,
            height,
            dimension: TextureDimension::D2Array { layers },
            format,
        }
    }
}

/// A sub-rectangle of one texture layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub layer: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferDescriptor<'a> {
    pub label: Option<&'a str>,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_texture_dimension_2d: u32,
    pub max_texture_array_layers: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_texture_dimension_2d: 8192,
            max_texture_array_layers: 256,
        }
    }
}

/// Colour and depth attachments a pass renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetBinding {
    pub color: TextureHandle,
    pub depth: Option<TextureHandle>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RectPassKind {
    /// Writes palette indices, depth test *less*.
    Opaque,
    /// Writes `(value, mode)` pairs, depth test *greater*.
    Transparent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RectPass {
    pub target: TargetBinding,
    pub kind: RectPassKind,
    /// Layered atlas texture sampled by colour and mask lookups.
    pub atlases: TextureHandle,
    /// Remap table texture, 256 wide, one row per palette plus identity row 0.
    pub palette: TextureHandle,
    /// Depth of the previous peel. Fragments at or in front of it are rejected.
    pub peel_depth: Option<TextureHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinePass {
    pub target: TargetBinding,
}

/// Full-screen resolve of one transparent peel into the mix target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositePass {
    pub target: TextureHandle,
    pub opaque_color: TextureHandle,
    pub opaque_depth: TextureHandle,
    pub transparent_color: TextureHandle,
    pub transparent_depth: TextureHandle,
    pub palette: TextureHandle,
    pub blend_palette: TextureHandle,
    pub width: u32,
    pub height: u32,
}

bitflags! {
    /// Flag bits of a [`DrawRectInstance`]. The low two bits hold the palette count.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RectFlags: u32 {
        const PALETTE_COUNT = 0b11;
        const NO_TEXTURE = 1 << 2;
        const MASK = 1 << 3;
        const CROSS_HATCH = 1 << 4;
        const TEXT = 1 << 5;
        const BLEND = 1 << 6;
    }
}

impl RectFlags {
    pub fn with_palette_count(count: u32) -> Self {
        RectFlags::from_bits_retain(count.min(3))
    }

    pub fn palette_count(self) -> u32 {
        (self & RectFlags::PALETTE_COUNT).bits()
    }
}

/// Transparency modes stored in the second channel of a transparent target.
pub mod transparency_mode {
    pub const NONE: u8 = 0;
    /// Remap the opaque colour through the palette whose id is the stored value.
    pub const REMAP: u8 = 1;
    /// Blend the opaque colour with the stored colour index.
    pub const BLEND: u8 = 2;
}

/// Colour ranges affected by multi-palette remaps: primary, secondary, tertiary.
pub const REMAP_RANGES: [(u8, u8); 3] = [(243, 254), (202, 213), (46, 57)];

/// Depth resolution. Counters must stay below this to remain distinct.
pub const DEPTH_STEPS: f32 = 16_777_216.0;

/// Depth written by the instance with the given draw counter.
///
/// Later draws are nearer (smaller), so *less* keeps the newest opaque pixel
/// and *greater* peels transparent layers oldest first.
#[inline]
pub fn depth_value(counter: i32) -> f32 {
    1.0 - (counter as f32 + 1.0) / DEPTH_STEPS
}

/// GPU instance record for one rectangle.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DrawRectInstance {
    pub clip: [i32; 4],
    pub tex_colour_bounds: [f32; 4],
    pub tex_mask_bounds: [f32; 4],
    pub bounds: [i32; 4],
    /// Palette rows. Row 0 is the identity table.
    pub palettes: [i32; 3],
    pub tex_colour_atlas: i32,
    pub tex_mask_atlas: i32,
    pub flags: u32,
    pub colour: u32,
    pub depth: i32,
    /// World pixels per screen pixel in the recording view. Atlas reads
    /// step this many texels per screen pixel.
    pub zoom: f32,
    pub _reserved: [u32; 3],
}

const_assert_eq!(std::mem::size_of::<DrawRectInstance>(), 112);

impl Default for DrawRectInstance {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            ..<Self as Zeroable>::zeroed()
        }
    }
}

impl DrawRectInstance {
    pub fn rect_flags(&self) -> RectFlags {
        RectFlags::from_bits_retain(self.flags)
    }
}

/// GPU instance record for one line.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct DrawLineInstance {
    pub clip: [i32; 4],
    /// Endpoints packed as `[x1, y1, x2, y2]`.
    pub bounds: [i32; 4],
    pub colour: u32,
    pub depth: i32,
    pub _reserved: [u32; 2],
}

const_assert_eq!(std::mem::size_of::<DrawLineInstance>(), 48);

/// Errors a device reports after the fact. They are diagnostics, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    #[error("internal device error: {0}")]
    Internal(String),
}

/// Trait abstracting the GPU operations the renderer needs.
///
/// Methods take `&self` so the device can be shared through an `Arc` and mock
/// implementations can record calls with interior mutability. Operations never
/// fail inline: a device latches its first error and hands it out through
/// [`RenderDevice::take_error`], which also clears it.
pub trait RenderDevice: Send + Sync {
    fn limits(&self) -> DeviceLimits;

    // Texture operations

    fn create_texture(&self, desc: &TextureDescriptor) -> TextureHandle;

    fn destroy_texture(&self, texture: TextureHandle);

    /// Upload tightly packed pixels into a region of one layer.
    fn write_texture(&self, texture: TextureHandle, region: TextureRegion, data: &[u8]);

    /// Copy the first `layers` layers of `src` into `dst`.
    fn copy_texture_layers(&self, src: TextureHandle, dst: TextureHandle, layers: u32);

    /// Set the first channel of every texel to `value` and zero the rest.
    fn clear_color(&self, texture: TextureHandle, value: u8);

    fn clear_depth(&self, texture: TextureHandle, value: f32);

    // Buffer operations

    fn create_buffer(&self, desc: &BufferDescriptor) -> BufferHandle;

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]);

    fn destroy_buffer(&self, buffer: BufferHandle);

    // Draws

    /// Draw `count` [`DrawLineInstance`]s from `instances`.
    fn draw_lines(&self, pass: &LinePass, instances: BufferHandle, count: u32);

    /// Draw `count` [`DrawRectInstance`]s from `instances`.
    fn draw_rects(&self, pass: &RectPass, instances: BufferHandle, count: u32);

    /// Resolve the transparent target against the opaque target into `pass.target`.
    fn apply_transparency(&self, pass: &CompositePass);

    /// Read one layer back as tightly packed pixels.
    fn read_texture(&self, texture: TextureHandle, layer: u32) -> Result<Vec<u8>, DeviceError>;

    /// Take the pending error, leaving the device error state clear.
    fn take_error(&self) -> Option<DeviceError>;
}
