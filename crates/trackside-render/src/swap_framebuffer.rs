//! Opaque, transparent and mix targets plus the peel ping-pong between them.

use std::sync::Arc;

use tracing::error;
use trackside_core::gpu::{
    CompositePass, RenderDevice, TargetBinding, TextureDescriptor, TextureFormat, TextureHandle,
};

use crate::render_target::RenderTarget;

/// Opaque depth starts at the far plane so any draw passes *less*.
const OPAQUE_DEPTH_CLEAR: f32 = 1.0;
/// Transparent depth starts behind everything so any draw passes *greater*.
const TRANSPARENT_DEPTH_CLEAR: f32 = 0.0;

/// The render targets of one screen-sized frame.
///
/// - *opaque*: palette indices plus depth, holds the final image;
/// - *transparent*: `(value, mode)` pairs plus depth for the current peel;
/// - *mix*: composite output, swapped with the opaque colour after each peel;
/// - *back depth*: transparent depth of the previous peel.
pub struct SwapFramebuffer {
    device: Arc<dyn RenderDevice>,
    width: u32,
    height: u32,
    opaque: RenderTarget,
    transparent: RenderTarget,
    mix: RenderTarget,
    back_depth: TextureHandle,
}

impl SwapFramebuffer {
    pub fn new(device: Arc<dyn RenderDevice>, width: u32, height: u32) -> Self {
        let opaque = RenderTarget::builder(width, height)
            .format(TextureFormat::R8Uint)
            .with_depth()
            .label("Opaque")
            .build(&*device);
        let transparent = RenderTarget::builder(width, height)
            .format(TextureFormat::Rg8Uint)
            .with_depth()
            .label("Transparent")
            .build(&*device);
        let mix = RenderTarget::builder(width, height)
            .format(TextureFormat::R8Uint)
            .label("Mix")
            .build(&*device);
        let back_depth = device.create_texture(&TextureDescriptor::new_2d(
            "Back Depth",
            width,
            height,
            TextureFormat::Depth32Float,
        ));

        let framebuffer = Self {
            device,
            width,
            height,
            opaque,
            transparent,
            mix,
            back_depth,
        };
        framebuffer.clear();
        framebuffer.clear_transparent();
        framebuffer.device.clear_depth(framebuffer.back_depth, TRANSPARENT_DEPTH_CLEAR);
        framebuffer.device.clear_color(framebuffer.mix.color(), 0);
        framebuffer
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Attachments for line and opaque rect draws.
    pub fn bind_opaque(&self) -> TargetBinding {
        self.opaque.binding()
    }

    /// Attachments for a transparent peel.
    pub fn bind_transparent(&self) -> TargetBinding {
        self.transparent.binding()
    }

    /// Transparent depth of the previous peel, the reference for the next one.
    pub fn back_depth(&self) -> TextureHandle {
        self.back_depth
    }

    /// Reset the opaque target at the start of a frame.
    ///
    /// The transparent target is left alone: it starts clear and every peel
    /// clears it again.
    pub fn clear(&self) {
        self.device.clear_color(self.opaque.color(), 0);
        if let Some(depth) = self.opaque.depth() {
            self.device.clear_depth(depth, OPAQUE_DEPTH_CLEAR);
        }
    }

    fn clear_transparent(&self) {
        self.device.clear_color(self.transparent.color(), 0);
        if let Some(depth) = self.transparent.depth() {
            self.device.clear_depth(depth, TRANSPARENT_DEPTH_CLEAR);
        }
    }

    /// Composite the current peel over the opaque image.
    ///
    /// Afterwards the opaque colour holds the blended result, the back depth
    /// holds this peel's depth and the transparent target is clear.
    pub fn apply_transparency(&mut self, palette: TextureHandle, blend_palette: TextureHandle) {
        let (Some(opaque_depth), Some(transparent_depth)) = (self.opaque.depth(), self.transparent.depth())
        else {
            error!("Swap framebuffer target is missing its depth attachment");
            return;
        };

        self.device.apply_transparency(&CompositePass {
            target: self.mix.color(),
            opaque_color: self.opaque.color(),
            opaque_depth,
            transparent_color: self.transparent.color(),
            transparent_depth,
            palette,
            blend_palette,
            width: self.width,
            height: self.height,
        });

        self.transparent.swap_depth(&mut self.back_depth);
        self.clear_transparent();
        self.opaque.swap_color(&mut self.mix);
    }

    /// The target holding the finished frame.
    pub fn final_framebuffer(&self) -> &RenderTarget {
        &self.opaque
    }
}

impl Drop for SwapFramebuffer {
    fn drop(&mut self) {
        self.opaque.release(&*self.device);
        self.transparent.release(&*self.device);
        self.mix.release(&*self.device);
        self.device.destroy_texture(self.back_depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackside_test_utils::MockRenderDevice;

    fn framebuffer(width: u32, height: u32) -> (Arc<MockRenderDevice>, SwapFramebuffer) {
        let device = Arc::new(MockRenderDevice::new());
        let framebuffer = SwapFramebuffer::new(device.clone(), width, height);
        (device, framebuffer)
    }

    #[test]
    fn test_initial_depths() {
        let (device, fb) = framebuffer(4, 4);
        let opaque_depth = fb.bind_opaque().depth.unwrap();
        let transparent_depth = fb.bind_transparent().depth.unwrap();
        assert_eq!(device.depth(opaque_depth, 0, 0), Some(1.0));
        assert_eq!(device.depth(transparent_depth, 0, 0), Some(0.0));
        assert_eq!(device.depth(fb.back_depth(), 3, 3), Some(0.0));
    }

    #[test]
    fn test_apply_transparency_swaps_targets() {
        let (device, mut fb) = framebuffer(4, 4);
        let opaque_before = fb.final_framebuffer().color();
        let transparent_depth_before = fb.bind_transparent().depth.unwrap();
        let back_before = fb.back_depth();

        let palette = device.create_texture(&TextureDescriptor::new_2d("palette", 256, 257, TextureFormat::R8Uint));
        let blend = device.create_texture(&TextureDescriptor::new_2d("blend", 256, 256, TextureFormat::R8Uint));
        fb.apply_transparency(palette, blend);

        assert_ne!(fb.final_framebuffer().color(), opaque_before);
        assert_eq!(fb.back_depth(), transparent_depth_before);
        assert_eq!(fb.bind_transparent().depth, Some(back_before));
        assert_eq!(device.count_composites(), 1);
        assert!(device.take_error().is_none());
    }

    #[test]
    fn test_drop_releases_all_textures() {
        let (device, fb) = framebuffer(8, 8);
        // opaque colour + depth, transparent colour + depth, mix, back depth
        assert_eq!(device.live_texture_count(), 6);
        drop(fb);
        assert_eq!(device.live_texture_count(), 0);
    }
}
