//! Frame-level entry point wrapping a [`DrawingContext`].

use std::sync::Arc;

use tracing::{debug, info};
use trackside_core::config::{Config, ProfilingMode};
use trackside_core::geometry::Size;
use trackside_core::gpu::RenderDevice;
use trackside_core::palette::{PALETTE_SIZE, PaletteSource};
use trackside_core::profiling::{self, ProfilingBackend};
use trackside_core::sprite::{ImageId, SpriteSource};

use crate::drawing_context::{DrawingContext, FlushStats, RenderView};
use crate::error::Result;

/// Palette indices read back from the final framebuffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCapture {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl FrameCapture {
    pub fn pixel(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }

    /// Expand to RGBA through a palette's colour table.
    pub fn to_rgba(&self, colours: &[[u8; 4]; PALETTE_SIZE]) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|&index| colours[index as usize])
            .collect()
    }
}

/// Owns the drawing context and brackets each frame.
///
/// ```rust,ignore
/// engine.begin_draw();
/// let ctx = engine.context_for(view);
/// ctx.fill_rect(10, 0, 0, 31, 31);
/// ctx.draw_sprite(image, 0, 0, 0)?;
/// let stats = engine.end_draw();
/// ```
pub struct DrawingEngine {
    device: Arc<dyn RenderDevice>,
    palette: Arc<dyn PaletteSource>,
    context: DrawingContext,
    size: Size<u32>,
    frame: u64,
    profiling: bool,
}

impl DrawingEngine {
    pub fn new(
        device: Arc<dyn RenderDevice>,
        sprites: Arc<dyn SpriteSource>,
        palette: Arc<dyn PaletteSource>,
        width: u32,
        height: u32,
        config: Config,
    ) -> Result<Self> {
        match config.profiling {
            ProfilingMode::Off => {}
            ProfilingMode::On => profiling::init_profiling(ProfilingBackend::InProcess),
            #[cfg(feature = "profiling")]
            ProfilingMode::WithServer => profiling::init_profiling(ProfilingBackend::PuffinHttp),
            #[cfg(not(feature = "profiling"))]
            ProfilingMode::WithServer => profiling::init_profiling(ProfilingBackend::InProcess),
        }

        let context = DrawingContext::new(device.clone(), sprites, &*palette, width, height, &config)?;
        info!(width, height, "Drawing engine ready");
        Ok(Self {
            device,
            palette,
            context,
            size: Size::new(width, height),
            frame: 0,
            profiling: config.profiling != ProfilingMode::Off,
        })
    }

    pub fn size(&self) -> Size<u32> {
        self.size
    }

    /// Frames finished with [`DrawingEngine::end_draw`].
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if self.size == Size::new(width, height) {
            return;
        }
        self.size = Size::new(width, height);
        self.context.resize(width, height);
    }

    /// Re-read remap and blend tables from the palette provider.
    pub fn set_palette(&mut self) {
        debug!("Palette changed");
        self.context.reset_palette(&*self.palette);
    }

    /// Start a frame: reset depth ordering and clear the opaque target.
    pub fn begin_draw(&mut self) -> &mut DrawingContext {
        if self.profiling {
            profiling::new_frame();
        }
        self.context.start_new_draw();
        self.context
            .set_view(RenderView::screen(self.size.width, self.size.height));
        &mut self.context
    }

    /// The drawing context aimed at `view`.
    pub fn context_for(&mut self, view: RenderView) -> &mut DrawingContext {
        self.context.set_view(view);
        &mut self.context
    }

    pub fn context(&mut self) -> &mut DrawingContext {
        &mut self.context
    }

    /// Flush everything recorded this frame.
    pub fn end_draw(&mut self) -> FlushStats {
        self.context.flush_command_buffers();
        self.frame += 1;
        self.context.stats()
    }

    pub fn invalidate_image(&mut self, image: ImageId) {
        self.context.invalidate_image(image);
    }

    /// Read back the finished frame as palette indices.
    pub fn capture_frame(&self) -> Result<FrameCapture> {
        let target = self.context.final_framebuffer();
        let pixels = self.device.read_texture(target.color(), 0)?;
        Ok(FrameCapture {
            width: target.width(),
            height: target.height(),
            pixels,
        })
    }

    /// Read back the finished frame in RGBA using the current palette colours.
    pub fn capture_frame_rgba(&self) -> Result<Vec<u8>> {
        Ok(self.capture_frame()?.to_rgba(&self.palette.colours()))
    }
}
