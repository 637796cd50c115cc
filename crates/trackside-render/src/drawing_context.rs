//! Records paint calls as instance records and flushes them to the device.
//!
//! Draws are never issued immediately. Each call appends one record to the
//! line, opaque rect or translucent rect batch and stamps it with the next
//! depth counter; [`DrawingContext::flush_command_buffers`] then draws each
//! batch with a single instanced call, peeling the translucent batch as many
//! times as rects stack on one pixel.

use std::sync::Arc;

use tracing::{debug, warn};
use trackside_core::config::Config;
use trackside_core::geometry::Bounds;
use trackside_core::gpu::{
    BufferDescriptor, BufferHandle, DrawLineInstance, DrawRectInstance, LinePass, RectFlags, RectPass,
    RectPassKind, RenderDevice,
};
use trackside_core::palette::{FilterPaletteId, GlyphPalette, PaletteSource};
use trackside_core::profiling::{profile_function, profile_scope};
use trackside_core::sprite::{ImageId, SpriteElement, SpriteFlags, SpriteSource};

use crate::command_batch::CommandBatch;
use crate::error::Result;
use crate::render_target::RenderTarget;
use crate::swap_framebuffer::SwapFramebuffer;
use crate::texture_cache::{BasicTextureInfo, TextBitmap, TextureCache};
use crate::transparency::max_transparency_depth;

/// `fill_rect` colour bit: draw a checkerboard, skipping every other pixel.
pub const FILL_CROSS_HATCH: u32 = 0x0100_0000;
/// `fill_rect` colour bit: the low byte is a filter palette, see [`DrawingContext::filter_rect`].
pub const FILL_TRANSLUCENT: u32 = 0x0200_0000;

/// Coarsest zoom a [`RenderView`] can use; larger levels are clamped.
pub const MAX_ZOOM_LEVEL: u8 = 7;

/// A region of the world mapped onto a region of the screen.
///
/// `x`, `y`, `width` and `height` are in world pixels; the view shows them
/// scaled down by `2^zoom_level` with its top-left at `(offset_x, offset_y)`.
/// Levels above [`MAX_ZOOM_LEVEL`] behave as `MAX_ZOOM_LEVEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderView {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub offset_x: i32,
    pub offset_y: i32,
    pub zoom_level: u8,
}

impl RenderView {
    /// Unzoomed view of the whole screen.
    pub fn screen(width: u32, height: u32) -> Self {
        Self {
            width: width as i32,
            height: height as i32,
            ..Default::default()
        }
    }

    /// The same view with its zoom level clamped to [`MAX_ZOOM_LEVEL`].
    pub fn clamped(self) -> Self {
        Self {
            zoom_level: self.zoom_level.min(MAX_ZOOM_LEVEL),
            ..self
        }
    }

    fn zoom_shift(&self) -> u32 {
        self.zoom_level.min(MAX_ZOOM_LEVEL) as u32
    }

    /// World pixels per screen pixel.
    pub fn zoom_scale(&self) -> i32 {
        1 << self.zoom_shift()
    }

    /// Screen pixels this view may draw to.
    pub fn clip(&self) -> Bounds {
        let zoom = self.zoom_shift();
        Bounds::new(
            self.offset_x,
            self.offset_y,
            self.offset_x.saturating_add(self.width >> zoom),
            self.offset_y.saturating_add(self.height >> zoom),
        )
    }

    /// Added to unzoomed world coordinates to get screen coordinates.
    pub fn draw_offset(&self) -> (i32, i32) {
        (self.offset_x - self.x, self.offset_y - self.y)
    }

    /// The same screen region one zoom level finer, in halved world units.
    pub fn zoomed_in(&self) -> Self {
        Self {
            x: self.x >> 1,
            y: self.y >> 1,
            width: self.width >> 1,
            height: self.height >> 1,
            zoom_level: self.zoom_shift().saturating_sub(1) as u8,
            ..*self
        }
    }
}

/// Counters from the most recent flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushStats {
    pub lines: u32,
    pub rects: u32,
    pub transparent_rects: u32,
    pub peel_passes: u32,
    pub draw_calls: u32,
}

/// The three batches filled between flushes.
#[derive(Debug, Clone, Default)]
pub struct CommandBuffers {
    pub lines: CommandBatch<DrawLineInstance>,
    pub rects: CommandBatch<DrawRectInstance>,
    pub transparent: CommandBatch<DrawRectInstance>,
}

impl CommandBuffers {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: CommandBatch::with_capacity(capacity),
            rects: CommandBatch::with_capacity(capacity),
            transparent: CommandBatch::with_capacity(capacity),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.rects.is_empty() && self.transparent.is_empty()
    }

    fn clear(&mut self) {
        self.lines.clear();
        self.rects.clear();
        self.transparent.clear();
    }
}

/// Device buffer mirroring one batch, grown to the next power of two.
struct InstanceBuffer {
    label: &'static str,
    buffer: Option<BufferHandle>,
    capacity: usize,
}

impl InstanceBuffer {
    fn new(label: &'static str) -> Self {
        Self {
            label,
            buffer: None,
            capacity: 0,
        }
    }

    fn upload<T: bytemuck::Pod>(&mut self, device: &dyn RenderDevice, instances: &[T]) -> Option<BufferHandle> {
        if instances.is_empty() {
            return None;
        }
        if self.buffer.is_none() || instances.len() > self.capacity {
            if let Some(old) = self.buffer.take() {
                device.destroy_buffer(old);
            }
            let capacity = instances.len().next_power_of_two();
            self.buffer = Some(device.create_buffer(&BufferDescriptor {
                label: Some(self.label),
                size: (capacity * std::mem::size_of::<T>()) as u64,
            }));
            self.capacity = capacity;
        }
        let buffer = self.buffer?;
        device.write_buffer(buffer, 0, bytemuck::cast_slice(instances));
        Some(buffer)
    }

    fn release(&mut self, device: &dyn RenderDevice) {
        if let Some(buffer) = self.buffer.take() {
            device.destroy_buffer(buffer);
        }
        self.capacity = 0;
    }
}

/// Palette rows and routing of a sprite draw.
struct SpritePalettes {
    count: u32,
    rows: [i32; 3],
    /// Single palette used by translucent sprites.
    filter: FilterPaletteId,
    /// Water-like sprites blend with what is underneath.
    special: bool,
}

fn sprite_palettes(image: ImageId, tertiary_colour: u8) -> SpritePalettes {
    if image.is_remap_2_plus() {
        let primary = FilterPaletteId(image.primary_colour());
        let secondary = FilterPaletteId(image.secondary_colour());
        let (count, tertiary) = if image.is_remap() {
            (2, 0)
        } else {
            (3, FilterPaletteId(tertiary_colour).row())
        };
        SpritePalettes {
            count,
            rows: [primary.row(), secondary.row(), tertiary],
            filter: primary,
            special: false,
        }
    } else if image.is_remap() || image.is_transparent() {
        let palette = FilterPaletteId(image.palette());
        SpritePalettes {
            count: 1,
            rows: [palette.row(), 0, 0],
            filter: palette,
            special: palette == FilterPaletteId::WATER,
        }
    } else {
        SpritePalettes {
            count: 0,
            rows: [0; 3],
            filter: FilterPaletteId(0),
            special: false,
        }
    }
}

pub struct DrawingContext {
    device: Arc<dyn RenderDevice>,
    sprites: Arc<dyn SpriteSource>,
    texture_cache: TextureCache,
    swap_framebuffer: SwapFramebuffer,
    commands: CommandBuffers,
    line_buffer: InstanceBuffer,
    rect_buffer: InstanceBuffer,
    transparent_buffer: InstanceBuffer,
    view: RenderView,
    clip: Bounds,
    draw_count: i32,
    stats: FlushStats,
}

impl DrawingContext {
    pub fn new(
        device: Arc<dyn RenderDevice>,
        sprites: Arc<dyn SpriteSource>,
        palette: &dyn PaletteSource,
        width: u32,
        height: u32,
        config: &Config,
    ) -> Result<Self> {
        let texture_cache = TextureCache::new(device.clone(), sprites.clone(), palette, config)?;
        let swap_framebuffer = SwapFramebuffer::new(device.clone(), width, height);
        let view = RenderView::screen(width, height);
        Ok(Self {
            device,
            sprites,
            texture_cache,
            swap_framebuffer,
            commands: CommandBuffers::with_capacity(config.initial_batch_capacity),
            line_buffer: InstanceBuffer::new("Line Instances"),
            rect_buffer: InstanceBuffer::new("Rect Instances"),
            transparent_buffer: InstanceBuffer::new("Transparent Rect Instances"),
            view,
            clip: view.clip(),
            draw_count: 0,
            stats: FlushStats::default(),
        })
    }

    /// Direct subsequent draws at a different view, clamping its zoom.
    pub fn set_view(&mut self, view: RenderView) {
        self.view = view.clamped();
        self.clip = self.view.clip();
    }

    pub fn view(&self) -> RenderView {
        self.view
    }

    pub fn texture_cache(&self) -> &TextureCache {
        &self.texture_cache
    }

    /// Records waiting for the next flush.
    pub fn command_buffers(&self) -> &CommandBuffers {
        &self.commands
    }

    pub fn stats(&self) -> FlushStats {
        self.stats
    }

    /// The target holding the finished frame after a flush.
    pub fn final_framebuffer(&self) -> &RenderTarget {
        self.swap_framebuffer.final_framebuffer()
    }

    fn next_depth(&mut self) -> i32 {
        let depth = self.draw_count;
        self.draw_count += 1;
        depth
    }

    /// Reset the depth counter and the opaque target for a new frame.
    pub fn start_new_draw(&mut self) {
        self.draw_count = 0;
        self.swap_framebuffer.clear();
    }

    /// Recreate the targets at a new size. Pending draws are discarded.
    pub fn resize(&mut self, width: u32, height: u32) {
        debug!(width, height, "Resizing drawing context");
        self.commands.clear();
        self.texture_cache.release_pending_slots();
        self.swap_framebuffer = SwapFramebuffer::new(self.device.clone(), width, height);
        self.set_view(RenderView::screen(width, height));
        self.check_device_error("resize");
    }

    /// Re-upload remap and blend tables after the game palette changed.
    pub fn reset_palette(&mut self, palette: &dyn PaletteSource) {
        self.texture_cache.upload_palettes(palette);
        self.check_device_error("reset_palette");
    }

    /// Forget every cached copy of an image so it is decoded again.
    pub fn invalidate_image(&mut self, image: ImageId) {
        self.texture_cache.invalidate_image(image);
    }

    /// Fill the whole view with one palette index.
    pub fn clear(&mut self, colour: u8) {
        let (dx, dy) = self.view.draw_offset();
        let clip = self.clip;
        self.fill_rect(
            colour as u32,
            clip.left - dx,
            clip.top - dy,
            clip.right - dx - 1,
            clip.bottom - dy - 1,
        );
    }

    /// Fill `[left, right] x [top, bottom]` (inclusive) with a palette index.
    ///
    /// [`FILL_CROSS_HATCH`] fills a checkerboard; [`FILL_TRANSLUCENT`] treats
    /// the low byte as a filter palette instead.
    pub fn fill_rect(&mut self, colour: u32, left: i32, top: i32, right: i32, bottom: i32) {
        if colour & FILL_TRANSLUCENT != 0 {
            self.filter_rect(FilterPaletteId((colour & 0xFF) as u8), left, top, right, bottom);
            return;
        }
        let Some(bounds) = self.screen_rect(left, top, right, bottom) else {
            return;
        };
        let mut flags = RectFlags::NO_TEXTURE;
        if colour & FILL_CROSS_HATCH != 0 {
            flags |= RectFlags::CROSS_HATCH;
        }
        let depth = self.next_depth();
        self.commands.rects.push(DrawRectInstance {
            clip: self.clip.to_array(),
            bounds: bounds.to_array(),
            flags: flags.bits(),
            colour: colour & 0xFF,
            depth,
            ..Default::default()
        });
    }

    /// Remap everything already drawn under `[left, right] x [top, bottom]`
    /// through a filter palette.
    pub fn filter_rect(&mut self, palette: FilterPaletteId, left: i32, top: i32, right: i32, bottom: i32) {
        let Some(bounds) = self.screen_rect(left, top, right, bottom) else {
            return;
        };
        let depth = self.next_depth();
        self.commands.transparent.push(DrawRectInstance {
            clip: self.clip.to_array(),
            bounds: bounds.to_array(),
            flags: RectFlags::NO_TEXTURE.bits(),
            colour: palette.0 as u32,
            depth,
            ..Default::default()
        });
    }

    /// Inclusive world rect to exclusive screen bounds, `None` when nothing
    /// would be visible.
    fn screen_rect(&self, left: i32, top: i32, right: i32, bottom: i32) -> Option<Bounds> {
        let (dx, dy) = self.view.draw_offset();
        let bounds = Bounds::new(left, top, right.saturating_add(1), bottom.saturating_add(1))
            .translate(dx, dy);
        (!bounds.is_empty() && !bounds.intersect(&self.clip).is_empty()).then_some(bounds)
    }

    /// Draw a one pixel wide line, both endpoints included.
    pub fn draw_line(&mut self, colour: u32, x1: i32, y1: i32, x2: i32, y2: i32) {
        let (dx, dy) = self.view.draw_offset();
        let depth = self.next_depth();
        self.commands.lines.push(DrawLineInstance {
            clip: self.clip.to_array(),
            bounds: [x1 + dx, y1 + dy, x2 + dx, y2 + dy],
            colour: colour & 0xFF,
            depth,
            ..Default::default()
        });
    }

    /// Draw a sprite with its remap palettes applied.
    ///
    /// When zoomed out, sprites with a half-size variant draw that variant one
    /// zoom level finer, and sprites flagged [`SpriteFlags::NO_ZOOM_DRAW`] are
    /// skipped. Missing and undecodable sprites are skipped silently.
    pub fn draw_sprite(&mut self, image: ImageId, x: i32, y: i32, tertiary_colour: u8) -> Result<()> {
        let index = image.index();
        let Some(element) = self.sprites.element(index) else {
            return Ok(());
        };

        if self.view.zoom_level > 0 {
            if element.flags.contains(SpriteFlags::HAS_ZOOM_SPRITE) {
                let Some(zoomed) = index.checked_sub(element.zoomed_offset) else {
                    return Ok(());
                };
                return self.draw_zoomed_sprite(image.with_index(zoomed), x, y, tertiary_colour);
            }
            if element.flags.contains(SpriteFlags::NO_ZOOM_DRAW) {
                return Ok(());
            }
        }

        let Some(bounds) = self.sprite_bounds(&element, x, y) else {
            return Ok(());
        };
        let Some(texture) = self.texture_cache.get_or_load_image_texture(image)? else {
            return Ok(());
        };

        let palettes = sprite_palettes(image, tertiary_colour);
        let base = DrawRectInstance {
            clip: self.clip.to_array(),
            tex_colour_atlas: texture.index as i32,
            tex_colour_bounds: texture.normalized_bounds,
            bounds: bounds.to_array(),
            depth: self.next_depth(),
            zoom: self.view.zoom_scale() as f32,
            ..Default::default()
        };

        if palettes.special {
            self.commands.transparent.push(DrawRectInstance {
                flags: RectFlags::BLEND.bits(),
                ..base
            });
        } else if image.is_transparent() {
            self.commands.transparent.push(DrawRectInstance {
                tex_mask_atlas: texture.index as i32,
                tex_mask_bounds: texture.normalized_bounds,
                flags: (RectFlags::NO_TEXTURE | RectFlags::MASK).bits(),
                colour: palettes.filter.0 as u32,
                ..base
            });
        } else {
            self.commands.rects.push(DrawRectInstance {
                palettes: palettes.rows,
                flags: RectFlags::with_palette_count(palettes.count).bits(),
                ..base
            });
        }
        Ok(())
    }

    fn draw_zoomed_sprite(&mut self, image: ImageId, x: i32, y: i32, tertiary_colour: u8) -> Result<()> {
        let view = self.view;
        self.set_view(view.zoomed_in());
        let result = self.draw_sprite(image, x >> 1, y >> 1, tertiary_colour);
        self.set_view(view);
        result
    }

    /// Screen bounds of a sprite drawn at world `(x, y)` in the current view.
    fn sprite_bounds(&self, element: &SpriteElement, x: i32, y: i32) -> Option<Bounds> {
        let zoom = self.view.zoom_shift();
        let zoom_mask = -1i32 << zoom;
        let rle = element.flags.contains(SpriteFlags::RLE_COMPRESSION);

        let mut left = x + element.x_offset;
        let mut top = y + element.y_offset;
        if zoom != 0 && rle {
            top -= !zoom_mask;
        }
        if !rle {
            top &= zoom_mask;
            left += !zoom_mask;
        }
        left &= zoom_mask;

        let right = left + element.width;
        let mut bottom = top + element.height;
        if zoom != 0 && rle {
            bottom += top & !zoom_mask;
        }

        self.to_screen(Bounds::new(left, top, right, bottom))
    }

    /// World bounds to screen bounds through the current view's zoom.
    fn to_screen(&self, world: Bounds) -> Option<Bounds> {
        let scale = self.view.zoom_scale();
        let world = world.normalized();
        let bounds = Bounds::new(
            (world.left - self.view.x) / scale + self.clip.left,
            (world.top - self.view.y) / scale + self.clip.top,
            (world.right - self.view.x) / scale + self.clip.left,
            (world.bottom - self.view.y) / scale + self.clip.top,
        );
        (!bounds.is_empty() && !bounds.intersect(&self.clip).is_empty()).then_some(bounds)
    }

    /// Draw `colour_image` through the non-zero pixels of `mask_image`.
    pub fn draw_sprite_raw_masked(&mut self, x: i32, y: i32, mask_image: ImageId, colour_image: ImageId) -> Result<()> {
        let (Some(mask), Some(colour)) = (
            self.sprites.element(mask_image.index()),
            self.sprites.element(colour_image.index()),
        ) else {
            return Ok(());
        };

        let left = x + mask.x_offset;
        let top = y + mask.y_offset;
        let world = Bounds::new(
            left,
            top,
            left + mask.width.min(colour.width),
            top + mask.height.min(colour.height),
        );
        let Some(bounds) = self.to_screen(world) else {
            return Ok(());
        };

        let Some(mask_texture) = self.texture_cache.get_or_load_image_texture(mask_image)? else {
            return Ok(());
        };
        let Some(colour_texture) = self.texture_cache.get_or_load_image_texture(colour_image)? else {
            return Ok(());
        };

        let depth = self.next_depth();
        self.commands.rects.push(DrawRectInstance {
            clip: self.clip.to_array(),
            tex_colour_atlas: colour_texture.index as i32,
            tex_colour_bounds: colour_texture.normalized_bounds,
            tex_mask_atlas: mask_texture.index as i32,
            tex_mask_bounds: mask_texture.normalized_bounds,
            bounds: bounds.to_array(),
            flags: RectFlags::MASK.bits(),
            depth,
            zoom: self.view.zoom_scale() as f32,
            ..Default::default()
        });
        Ok(())
    }

    /// Draw the silhouette of a sprite in a single colour.
    pub fn draw_sprite_solid(&mut self, image: ImageId, x: i32, y: i32, colour: u8) -> Result<()> {
        let Some((bounds, texture)) = self.unzoomed_sprite(image, x, y, |cache, image| {
            cache.get_or_load_image_texture(image)
        })?
        else {
            return Ok(());
        };
        let depth = self.next_depth();
        self.commands.rects.push(DrawRectInstance {
            clip: self.clip.to_array(),
            tex_mask_atlas: texture.index as i32,
            tex_mask_bounds: texture.normalized_bounds,
            bounds: bounds.to_array(),
            flags: (RectFlags::NO_TEXTURE | RectFlags::MASK).bits(),
            colour: colour as u32,
            depth,
            ..Default::default()
        });
        Ok(())
    }

    /// Draw a font glyph coloured through `palette`.
    pub fn draw_glyph(&mut self, image: ImageId, x: i32, y: i32, palette: &GlyphPalette) -> Result<()> {
        let Some((bounds, texture)) = self.unzoomed_sprite(image, x, y, |cache, image| {
            cache.get_or_load_glyph_texture(image, palette)
        })?
        else {
            return Ok(());
        };
        let depth = self.next_depth();
        self.commands.rects.push(DrawRectInstance {
            clip: self.clip.to_array(),
            tex_colour_atlas: texture.index as i32,
            tex_colour_bounds: texture.normalized_bounds,
            bounds: bounds.to_array(),
            depth,
            ..Default::default()
        });
        Ok(())
    }

    /// Bounds at the sprite's offsets ignoring zoom, plus its texture.
    fn unzoomed_sprite(
        &mut self,
        image: ImageId,
        x: i32,
        y: i32,
        load: impl FnOnce(&mut TextureCache, ImageId) -> Result<Option<BasicTextureInfo>>,
    ) -> Result<Option<(Bounds, BasicTextureInfo)>> {
        let Some(element) = self.sprites.element(image.index()) else {
            return Ok(None);
        };
        let (dx, dy) = self.view.draw_offset();
        let left = x + element.x_offset;
        let top = y + element.y_offset;
        let bounds = Bounds::new(left, top, left + element.width, top + element.height)
            .normalized()
            .translate(dx, dy);
        if bounds.is_empty() || bounds.intersect(&self.clip).is_empty() {
            return Ok(None);
        }
        Ok(load(&mut self.texture_cache, image)?.map(|texture| (bounds, texture)))
    }

    /// Draw a pre-rendered text bitmap in one colour.
    pub fn draw_text_bitmap(&mut self, image: ImageId, x: i32, y: i32, bitmap: &TextBitmap, colour: u8) -> Result<()> {
        let (dx, dy) = self.view.draw_offset();
        let bounds = Bounds::new(x, y, x + bitmap.width as i32, y + bitmap.height as i32).translate(dx, dy);
        if bounds.is_empty() || bounds.intersect(&self.clip).is_empty() {
            return Ok(());
        }
        let Some(texture) = self.texture_cache.get_or_load_bitmap_texture(image, bitmap)? else {
            return Ok(());
        };
        let depth = self.next_depth();
        self.commands.rects.push(DrawRectInstance {
            clip: self.clip.to_array(),
            tex_colour_atlas: texture.index as i32,
            tex_colour_bounds: texture.normalized_bounds,
            bounds: bounds.to_array(),
            flags: RectFlags::TEXT.bits(),
            colour: colour as u32,
            depth,
            ..Default::default()
        });
        Ok(())
    }

    /// Draw everything recorded since the last flush.
    ///
    /// Lines, then opaque rects, then the translucent peel loop. The batches
    /// are empty afterwards whatever the device reported.
    pub fn flush_command_buffers(&mut self) {
        profile_function!();
        self.check_device_error("before flush");

        let mut stats = FlushStats::default();
        self.flush_lines(&mut stats);
        self.flush_rectangles(&mut stats);
        self.handle_transparency(&mut stats);

        self.commands.clear();
        self.texture_cache.release_pending_slots();
        self.stats = stats;
    }

    fn flush_lines(&mut self, stats: &mut FlushStats) {
        profile_scope!("flush_lines");
        let count = self.commands.lines.len() as u32;
        let Some(buffer) = self.line_buffer.upload(&*self.device, self.commands.lines.as_slice()) else {
            return;
        };
        let pass = LinePass {
            target: self.swap_framebuffer.bind_opaque(),
        };
        self.device.draw_lines(&pass, buffer, count);
        stats.lines = count;
        stats.draw_calls += 1;
        self.check_device_error("flush_lines");
    }

    fn flush_rectangles(&mut self, stats: &mut FlushStats) {
        profile_scope!("flush_rectangles");
        let count = self.commands.rects.len() as u32;
        let Some(buffer) = self.rect_buffer.upload(&*self.device, self.commands.rects.as_slice()) else {
            return;
        };
        let pass = RectPass {
            target: self.swap_framebuffer.bind_opaque(),
            kind: RectPassKind::Opaque,
            atlases: self.texture_cache.atlas_texture(),
            palette: self.texture_cache.palette_texture(),
            peel_depth: None,
        };
        self.device.draw_rects(&pass, buffer, count);
        stats.rects = count;
        stats.draw_calls += 1;
        self.check_device_error("flush_rectangles");
    }

    fn handle_transparency(&mut self, stats: &mut FlushStats) {
        profile_scope!("handle_transparency");
        let instances = self.commands.transparent.as_slice();
        let count = instances.len() as u32;
        let Some(buffer) = self.transparent_buffer.upload(&*self.device, instances) else {
            return;
        };
        let max_depth = max_transparency_depth(instances);

        let atlases = self.texture_cache.atlas_texture();
        let palette = self.texture_cache.palette_texture();
        let blend = self.texture_cache.blend_texture();
        for peel in 0..max_depth {
            let pass = RectPass {
                target: self.swap_framebuffer.bind_transparent(),
                kind: RectPassKind::Transparent,
                atlases,
                palette,
                peel_depth: (peel > 0).then(|| self.swap_framebuffer.back_depth()),
            };
            self.device.draw_rects(&pass, buffer, count);
            self.swap_framebuffer.apply_transparency(palette, blend);
            stats.draw_calls += 2;
            self.check_device_error("transparency peel");
        }
        stats.transparent_rects = count;
        stats.peel_passes = max_depth;
    }

    /// Log and clear any error the device latched.
    fn check_device_error(&self, site: &'static str) {
        if let Some(error) = self.device.take_error() {
            warn!(site, error = %error, "GPU error");
        }
    }
}

impl Drop for DrawingContext {
    fn drop(&mut self) {
        self.line_buffer.release(&*self.device);
        self.rect_buffer.release(&*self.device);
        self.transparent_buffer.release(&*self.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackside_core::gpu::depth_value;
    use trackside_test_utils::{MockRenderDevice, StubPalette, StubSprites};

    fn context(width: u32, height: u32) -> (Arc<MockRenderDevice>, Arc<StubSprites>, DrawingContext) {
        let device = Arc::new(MockRenderDevice::new());
        let sprites = Arc::new(StubSprites::new());
        let context = DrawingContext::new(
            device.clone(),
            sprites.clone(),
            &StubPalette::new(),
            width,
            height,
            &Config::default(),
        )
        .unwrap();
        (device, sprites, context)
    }

    #[test]
    fn test_view_clip_and_offset() {
        let view = RenderView {
            x: 100,
            y: 50,
            width: 64,
            height: 32,
            offset_x: 10,
            offset_y: 20,
            zoom_level: 1,
        };
        assert_eq!(view.clip(), Bounds::new(10, 20, 42, 36));
        assert_eq!(view.draw_offset(), (-90, -30));

        let finer = view.zoomed_in();
        assert_eq!(finer.zoom_level, 0);
        assert_eq!((finer.x, finer.y), (50, 25));
        assert_eq!(finer.clip(), view.clip());
    }

    #[test]
    fn test_oversized_zoom_is_clamped() {
        let view = RenderView {
            zoom_level: 40,
            ..RenderView::screen(1024, 1024)
        };
        assert_eq!(view.clip(), Bounds::new(0, 0, 1024 >> MAX_ZOOM_LEVEL, 1024 >> MAX_ZOOM_LEVEL));
        assert_eq!(view.zoomed_in().zoom_level, MAX_ZOOM_LEVEL - 1);

        let (_, sprites, mut ctx) = context(64, 64);
        sprites.insert_solid(1, 256, 256, 1);
        ctx.set_view(view);
        assert_eq!(ctx.view().zoom_level, MAX_ZOOM_LEVEL);
        ctx.draw_sprite(ImageId::new(1), 0, 0, 0).unwrap();
        let rect = ctx.command_buffers().rects.as_slice()[0];
        assert_eq!(rect.bounds, [0, 0, 2, 2]);
        assert_eq!(rect.zoom, (1 << MAX_ZOOM_LEVEL) as f32);
    }

    #[test]
    fn test_fill_rect_at_coordinate_limit() {
        let (_, _, mut ctx) = context(64, 64);
        ctx.fill_rect(1, 0, 0, i32::MAX, i32::MAX);
        ctx.set_view(RenderView {
            x: -8,
            ..RenderView::screen(64, 64)
        });
        ctx.fill_rect(2, 0, 0, i32::MAX, 0);

        let rects = ctx.command_buffers().rects.as_slice();
        assert_eq!(rects[0].bounds, [0, 0, i32::MAX, i32::MAX]);
        assert_eq!(rects[1].bounds, [8, 0, i32::MAX, 1]);
    }

    #[test]
    fn test_later_draws_get_smaller_depth_across_batches() {
        let (_, sprites, mut ctx) = context(64, 64);
        sprites.insert_solid(1, 4, 4, 1);

        ctx.fill_rect(1, 0, 0, 3, 3);
        ctx.draw_line(2, 0, 0, 10, 10);
        ctx.draw_sprite(ImageId::new(1), 4, 4, 0).unwrap();
        ctx.filter_rect(FilterPaletteId(5), 0, 0, 20, 20);
        ctx.draw_line(3, 5, 0, 5, 10);
        ctx.draw_sprite(ImageId::new(1).with_palette(7).transparent(), 8, 8, 0)
            .unwrap();
        ctx.fill_rect(4, 2, 2, 6, 6);

        let buffers = ctx.command_buffers();
        let (lines, rects, transparent) = (
            buffers.lines.as_slice(),
            buffers.rects.as_slice(),
            buffers.transparent.as_slice(),
        );
        assert_eq!((lines.len(), rects.len(), transparent.len()), (2, 3, 2));

        let recorded = [
            rects[0].depth,
            lines[0].depth,
            rects[1].depth,
            transparent[0].depth,
            lines[1].depth,
            transparent[1].depth,
            rects[2].depth,
        ];
        assert_eq!(recorded, [0, 1, 2, 3, 4, 5, 6]);
        let depths: Vec<f32> = recorded.iter().map(|&counter| depth_value(counter)).collect();
        assert!(depths.windows(2).all(|pair| pair[1] < pair[0]), "{depths:?}");
    }

    #[test]
    fn test_fill_rect_is_inclusive() {
        let (_, _, mut ctx) = context(64, 64);
        ctx.fill_rect(7, 2, 3, 4, 5);
        let rect = ctx.command_buffers().rects.as_slice()[0];
        assert_eq!(rect.bounds, [2, 3, 5, 6]);
        assert_eq!(rect.colour, 7);
        assert_eq!(rect.rect_flags(), RectFlags::NO_TEXTURE);
    }

    #[test]
    fn test_fill_rect_colour_bits() {
        let (_, _, mut ctx) = context(64, 64);
        ctx.fill_rect(FILL_CROSS_HATCH | 0x1234, 0, 0, 1, 1);
        ctx.fill_rect(FILL_TRANSLUCENT | 45, 0, 0, 1, 1);

        let hatched = ctx.command_buffers().rects.as_slice()[0];
        assert_eq!(hatched.colour, 0x34);
        assert!(hatched.rect_flags().contains(RectFlags::CROSS_HATCH));

        let filtered = ctx.command_buffers().transparent.as_slice()[0];
        assert_eq!(filtered.colour, 45);
    }

    #[test]
    fn test_offscreen_rect_is_not_recorded() {
        let (_, _, mut ctx) = context(32, 32);
        ctx.fill_rect(1, 40, 40, 50, 50);
        ctx.fill_rect(1, 5, 5, 2, 2);
        assert!(ctx.command_buffers().is_empty());
    }

    #[test]
    fn test_view_offset_moves_draws() {
        let (_, _, mut ctx) = context(64, 64);
        ctx.set_view(RenderView {
            x: 100,
            y: 100,
            width: 32,
            height: 32,
            offset_x: 16,
            offset_y: 8,
            zoom_level: 0,
        });
        ctx.draw_line(3, 100, 100, 110, 100);
        let line = ctx.command_buffers().lines.as_slice()[0];
        assert_eq!(line.bounds, [16, 8, 26, 8]);
        assert_eq!(line.clip, [16, 8, 48, 40]);
    }

    #[test]
    fn test_remap_sprite_palette_rows() {
        let (_, sprites, mut ctx) = context(64, 64);
        sprites.insert_solid(1, 4, 4, 250);

        ctx.draw_sprite(ImageId::new(1).with_colours(3, 7), 0, 0, 9).unwrap();
        let two_colour = ImageId(ImageId::new(1).with_colours(3, 7).0 | ImageId::REMAP);
        ctx.draw_sprite(two_colour, 0, 0, 9).unwrap();
        let rects = ctx.command_buffers().rects.as_slice();
        assert_eq!(rects[0].rect_flags().palette_count(), 3);
        assert_eq!(rects[0].palettes, [4, 8, 10]);
        assert_eq!(rects[1].rect_flags().palette_count(), 2);
    }

    #[test]
    fn test_transparent_sprite_goes_to_translucent_batch() {
        let (_, sprites, mut ctx) = context(64, 64);
        sprites.insert_solid(1, 4, 4, 1);
        ctx.draw_sprite(ImageId::new(1).with_palette(60).transparent(), 0, 0, 0)
            .unwrap();

        assert!(ctx.command_buffers().rects.is_empty());
        let rect = ctx.command_buffers().transparent.as_slice()[0];
        assert_eq!(rect.colour, 60);
        assert_eq!(rect.rect_flags(), RectFlags::NO_TEXTURE | RectFlags::MASK);
    }

    #[test]
    fn test_water_sprite_blends() {
        let (_, sprites, mut ctx) = context(64, 64);
        sprites.insert_solid(1, 4, 4, 1);
        ctx.draw_sprite(ImageId::new(1).with_palette(FilterPaletteId::WATER.0), 0, 0, 0)
            .unwrap();
        let rect = ctx.command_buffers().transparent.as_slice()[0];
        assert!(rect.rect_flags().contains(RectFlags::BLEND));
    }

    #[test]
    fn test_missing_sprite_is_skipped() {
        let (_, _, mut ctx) = context(64, 64);
        ctx.draw_sprite(ImageId::new(99), 0, 0, 0).unwrap();
        ctx.draw_sprite_solid(ImageId::new(99), 0, 0, 1).unwrap();
        ctx.draw_glyph(ImageId::new(99), 0, 0, &GlyphPalette::default()).unwrap();
        assert!(ctx.command_buffers().is_empty());
    }

    #[test]
    fn test_no_zoom_draw_sprite_skipped_when_zoomed() {
        let (_, sprites, mut ctx) = context(64, 64);
        sprites.insert_solid(1, 4, 4, 1);
        sprites.set_flags(1, SpriteFlags::NO_ZOOM_DRAW);
        ctx.set_view(RenderView {
            zoom_level: 1,
            ..RenderView::screen(128, 128)
        });
        ctx.draw_sprite(ImageId::new(1), 0, 0, 0).unwrap();
        assert!(ctx.command_buffers().is_empty());
    }

    #[test]
    fn test_zoomed_sprite_bounds_are_scaled() {
        let (_, sprites, mut ctx) = context(64, 64);
        sprites.insert_solid(1, 8, 8, 1);
        ctx.set_view(RenderView {
            zoom_level: 1,
            ..RenderView::screen(128, 128)
        });
        ctx.draw_sprite(ImageId::new(1), 8, 8, 0).unwrap();
        let rect = ctx.command_buffers().rects.as_slice()[0];
        assert_eq!(rect.bounds, [4, 4, 8, 8]);
        assert_eq!(rect.zoom, 2.0);
    }

    #[test]
    fn test_masked_sprite_uses_smaller_extent() {
        let (_, sprites, mut ctx) = context(64, 64);
        sprites.insert_solid(1, 8, 4, 1);
        sprites.insert_solid(2, 6, 10, 2);
        ctx.draw_sprite_raw_masked(10, 10, ImageId::new(1), ImageId::new(2))
            .unwrap();
        let rect = ctx.command_buffers().rects.as_slice()[0];
        assert_eq!(rect.bounds, [10, 10, 16, 14]);
        assert_eq!(rect.rect_flags(), RectFlags::MASK);
    }

    #[test]
    fn test_flush_clears_batches_and_reports_stats() {
        let (device, _, mut ctx) = context(32, 32);
        ctx.draw_line(1, 0, 0, 5, 5);
        ctx.fill_rect(2, 0, 0, 3, 3);
        ctx.filter_rect(FilterPaletteId(1), 0, 0, 3, 3);
        ctx.filter_rect(FilterPaletteId(1), 1, 1, 4, 4);
        ctx.flush_command_buffers();

        assert!(ctx.command_buffers().is_empty());
        let stats = ctx.stats();
        assert_eq!(stats.lines, 1);
        assert_eq!(stats.rects, 1);
        assert_eq!(stats.transparent_rects, 2);
        assert_eq!(stats.peel_passes, 2);
        assert_eq!(device.count_composites(), 2);
        assert_eq!(device.count_rect_draws(RectPassKind::Transparent), 2);
    }

    #[test]
    fn test_flush_with_nothing_recorded_draws_nothing() {
        let (device, _, mut ctx) = context(32, 32);
        device.clear_calls();
        ctx.flush_command_buffers();
        assert_eq!(device.count_line_draws(), 0);
        assert_eq!(device.count_rect_draws(RectPassKind::Opaque), 0);
        assert_eq!(device.count_composites(), 0);
    }

    #[test]
    fn test_instance_buffer_reused_until_outgrown() {
        let (device, _, mut ctx) = context(32, 32);
        for _ in 0..3 {
            ctx.fill_rect(1, 0, 0, 1, 1);
        }
        ctx.flush_command_buffers();
        ctx.fill_rect(1, 0, 0, 1, 1);
        ctx.flush_command_buffers();
        assert_eq!(device.count_buffer_creates(), 1);

        for _ in 0..5 {
            ctx.fill_rect(1, 0, 0, 1, 1);
        }
        ctx.flush_command_buffers();
        assert_eq!(device.count_buffer_creates(), 2);
    }

    #[test]
    fn test_resize_drops_pending_draws() {
        let (device, _, mut ctx) = context(32, 32);
        ctx.fill_rect(1, 0, 0, 1, 1);
        ctx.resize(64, 48);
        assert!(ctx.command_buffers().is_empty());
        assert_eq!(ctx.final_framebuffer().width(), 64);
        assert_eq!(ctx.view().clip(), Bounds::new(0, 0, 64, 48));
        assert!(device.take_error().is_none());
    }
}
