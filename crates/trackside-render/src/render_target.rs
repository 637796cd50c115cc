//! Offscreen render targets made of device textures.

use trackside_core::geometry::Size;
use trackside_core::gpu::{RenderDevice, TargetBinding, TextureDescriptor, TextureFormat, TextureHandle};

/// A colour texture with an optional depth attachment.
#[derive(Debug)]
pub struct RenderTarget {
    color: TextureHandle,
    depth: Option<TextureHandle>,
    width: u32,
    height: u32,
    format: TextureFormat,
}

impl RenderTarget {
    /// Create a new render target builder.
    pub fn builder(width: u32, height: u32) -> RenderTargetBuilder {
        RenderTargetBuilder::new(width, height)
    }

    pub fn color(&self) -> TextureHandle {
        self.color
    }

    pub fn depth(&self) -> Option<TextureHandle> {
        self.depth
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> Size<u32> {
        Size::new(self.width, self.height)
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn has_depth(&self) -> bool {
        self.depth.is_some()
    }

    /// Attachments for a pass drawing into this target.
    pub fn binding(&self) -> TargetBinding {
        TargetBinding {
            color: self.color,
            depth: self.depth,
            width: self.width,
            height: self.height,
        }
    }

    /// Exchange colour textures with another target of the same format.
    pub fn swap_color(&mut self, other: &mut RenderTarget) {
        debug_assert_eq!(self.format, other.format);
        debug_assert_eq!(self.size(), other.size());
        std::mem::swap(&mut self.color, &mut other.color);
    }

    /// Exchange the depth attachment with a loose depth texture.
    pub fn swap_depth(&mut self, spare: &mut TextureHandle) {
        if let Some(depth) = self.depth.as_mut() {
            std::mem::swap(depth, spare);
        }
    }

    /// Destroy the backing textures.
    pub fn release(&self, device: &dyn RenderDevice) {
        device.destroy_texture(self.color);
        if let Some(depth) = self.depth {
            device.destroy_texture(depth);
        }
    }
}

/// Builder for creating render targets with an optional depth attachment.
pub struct RenderTargetBuilder {
    width: u32,
    height: u32,
    format: TextureFormat,
    with_depth: bool,
    label: Option<&'static str>,
}

impl RenderTargetBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::R8Uint,
            with_depth: false,
            label: None,
        }
    }

    pub fn format(mut self, format: TextureFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_depth(mut self) -> Self {
        self.with_depth = true;
        self
    }

    /// Set a debug label for the target's textures.
    pub fn label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }

    pub fn build(self, device: &dyn RenderDevice) -> RenderTarget {
        let label_prefix = self.label.unwrap_or("Render Target");

        let color_label = format!("{label_prefix} Color");
        let color = device.create_texture(&TextureDescriptor::new_2d(
            &color_label,
            self.width,
            self.height,
            self.format,
        ));

        let depth = self.with_depth.then(|| {
            let depth_label = format!("{label_prefix} Depth");
            device.create_texture(&TextureDescriptor::new_2d(
                &depth_label,
                self.width,
                self.height,
                TextureFormat::Depth32Float,
            ))
        });

        RenderTarget {
            color,
            depth,
            width: self.width,
            height: self.height,
            format: self.format,
        }
    }
}
