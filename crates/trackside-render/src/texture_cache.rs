//! GPU-resident cache of decoded sprites, glyphs and text bitmaps.
//!
//! Every cached image lives in one cell of an [`Atlas`]. All atlases share a
//! single layered texture: atlas `i` is layer `i`. When a new atlas is needed
//! the array is recreated one layer larger and the old layers are copied over.
//!
//! Sprite entries sit in a dense `Vec` with a reverse map from sprite index
//! to position, so lookups are two array reads and invalidation is a
//! swap-remove that patches the moved entry's map slot.

use std::sync::Arc;

use ahash::{HashMap, HashMapExt, HashSet};
use tracing::{debug, info, warn};
use trackside_core::config::Config;
use trackside_core::gpu::{
    RenderDevice, TextureDescriptor, TextureFormat, TextureHandle, TextureRegion,
};
use trackside_core::palette::{FilterPaletteId, GlyphPalette, PALETTE_ROWS, PALETTE_SIZE, PaletteSource};
use trackside_core::profiling::profile_scope;
use trackside_core::sprite::{ImageId, PixelDataSizeError, SpriteSource};

use crate::atlas::{Atlas, AtlasSlot, size_class};
use crate::error::{GraphicsError, Result};

const UNUSED_INDEX: u32 = u32::MAX;

/// What a draw needs to sample a cached image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasicTextureInfo {
    /// Texture array layer.
    pub index: u32,
    pub normalized_bounds: [f32; 4],
}

/// A cached image and the atlas cell holding it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtlasTextureInfo {
    /// Sprite table index of the image.
    pub image: u32,
    pub slot: AtlasSlot,
}

impl AtlasTextureInfo {
    pub fn basic(&self) -> BasicTextureInfo {
        BasicTextureInfo {
            index: self.slot.atlas,
            normalized_bounds: self.slot.normalized_bounds,
        }
    }
}

/// Glyphs are cached per palette since the palette is baked into the pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlyphId {
    pub image: u32,
    pub palette: GlyphPalette,
}

/// Pre-rendered text, one byte per pixel, non-zero where the text is inked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextBitmap {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> std::result::Result<Self, PixelDataSizeError> {
        PixelDataSizeError::check(width, height, pixels.len())?;
        Ok(Self { width, height, pixels })
    }
}

#[derive(Debug)]
struct CachedBitmap {
    info: AtlasTextureInfo,
    bitmap: TextBitmap,
}

pub struct TextureCache {
    device: Arc<dyn RenderDevice>,
    sprites: Arc<dyn SpriteSource>,

    atlas_width: u32,
    atlas_height: u32,
    min_slot_size: u32,
    layer_limit: u32,

    atlases: Vec<Atlas>,
    atlas_texture: TextureHandle,
    atlas_layers: u32,

    entries: Vec<AtlasTextureInfo>,
    index_map: Vec<u32>,
    glyphs: HashMap<GlyphId, AtlasTextureInfo>,
    bitmaps: HashMap<u32, CachedBitmap>,
    /// Replaced bitmap cells still referenced by unflushed draws.
    pending_free: Vec<AtlasSlot>,

    palette_texture: TextureHandle,
    blend_texture: TextureHandle,
}

impl TextureCache {
    /// Create the atlas, palette and blend textures.
    ///
    /// Fails when the configured atlas size does not fit the device.
    pub fn new(
        device: Arc<dyn RenderDevice>,
        sprites: Arc<dyn SpriteSource>,
        palette: &dyn PaletteSource,
        config: &Config,
    ) -> Result<Self> {
        let limits = device.limits();
        let largest = config.atlas_width.max(config.atlas_height);
        if largest > limits.max_texture_dimension_2d {
            return Err(GraphicsError::AtlasTooLarge {
                size: largest,
                max: limits.max_texture_dimension_2d,
            });
        }
        let layer_limit = config
            .max_atlas_layers
            .map_or(limits.max_texture_array_layers, |layers| {
                layers.min(limits.max_texture_array_layers)
            });

        let atlas_texture = device.create_texture(&TextureDescriptor::new_array(
            "Atlas Array",
            config.atlas_width,
            config.atlas_height,
            1,
            TextureFormat::R8Uint,
        ));
        let palette_texture = device.create_texture(&TextureDescriptor::new_2d(
            "Palette Remaps",
            PALETTE_SIZE as u32,
            PALETTE_ROWS,
            TextureFormat::R8Uint,
        ));
        let blend_texture = device.create_texture(&TextureDescriptor::new_2d(
            "Blend Palette",
            PALETTE_SIZE as u32,
            PALETTE_SIZE as u32,
            TextureFormat::R8Uint,
        ));

        let mut cache = Self {
            device,
            sprites,
            atlas_width: config.atlas_width,
            atlas_height: config.atlas_height,
            min_slot_size: config.min_slot_size,
            layer_limit,
            atlases: Vec::new(),
            atlas_texture,
            atlas_layers: 1,
            entries: Vec::new(),
            index_map: Vec::new(),
            glyphs: HashMap::new(),
            bitmaps: HashMap::new(),
            pending_free: Vec::new(),
            palette_texture,
            blend_texture,
        };
        cache.upload_palettes(palette);
        Ok(cache)
    }

    /// Re-upload the remap and blend tables.
    ///
    /// Row 0 of the remap texture is the identity table; palette id `n` lives
    /// in row `n + 1`. Ids without a table get identity rows.
    pub fn upload_palettes(&mut self, palette: &dyn PaletteSource) {
        profile_scope!("upload_palettes");

        let identity: [u8; PALETTE_SIZE] = std::array::from_fn(|i| i as u8);
        let mut remaps = Vec::with_capacity(PALETTE_SIZE * PALETTE_ROWS as usize);
        remaps.extend_from_slice(&identity);
        for id in 0..PALETTE_SIZE {
            let table = palette.remap_table(FilterPaletteId(id as u8)).unwrap_or(identity);
            remaps.extend_from_slice(&table);
        }
        self.device.write_texture(
            self.palette_texture,
            TextureRegion {
                x: 0,
                y: 0,
                width: PALETTE_SIZE as u32,
                height: PALETTE_ROWS,
                layer: 0,
            },
            &remaps,
        );

        // Without a blend table the opaque colour shows through.
        let blend = match palette.blend_table() {
            Some(table) if table.len() == PALETTE_SIZE * PALETTE_SIZE => table,
            Some(table) => {
                warn!(len = table.len(), "Ignoring blend table of the wrong size");
                Self::passthrough_blend()
            }
            None => Self::passthrough_blend(),
        };
        self.device.write_texture(
            self.blend_texture,
            TextureRegion {
                x: 0,
                y: 0,
                width: PALETTE_SIZE as u32,
                height: PALETTE_SIZE as u32,
                layer: 0,
            },
            &blend,
        );
    }

    fn passthrough_blend() -> Vec<u8> {
        (0..PALETTE_SIZE * PALETTE_SIZE)
            .map(|i| (i / PALETTE_SIZE) as u8)
            .collect()
    }

    /// Texture info for a sprite, decoding and uploading it on a miss.
    ///
    /// `Ok(None)` means the sprite cannot be drawn (missing, undecodable or
    /// larger than an atlas layer).
    pub fn get_or_load_image_texture(&mut self, image: ImageId) -> Result<Option<BasicTextureInfo>> {
        let index = image.index();
        if let Some(position) = self.lookup(index) {
            return Ok(Some(self.entries[position].basic()));
        }

        profile_scope!("image_cache_miss");
        let Some(sprite) = self.sprites.decode(index) else {
            debug!(image = index, "Sprite failed to decode");
            return Ok(None);
        };
        let Some(slot) = self.load_pixels(sprite.width, sprite.height, &sprite.pixels)? else {
            return Ok(None);
        };

        let info = AtlasTextureInfo { image: index, slot };
        let position = self.entries.len() as u32;
        self.entries.push(info);
        if self.index_map.len() <= index as usize {
            self.index_map.resize(index as usize + 1, UNUSED_INDEX);
        }
        self.index_map[index as usize] = position;
        Ok(Some(info.basic()))
    }

    /// Texture info for a glyph drawn with `palette`.
    pub fn get_or_load_glyph_texture(
        &mut self,
        image: ImageId,
        palette: &GlyphPalette,
    ) -> Result<Option<BasicTextureInfo>> {
        let key = GlyphId {
            image: image.index(),
            palette: *palette,
        };
        if let Some(info) = self.glyphs.get(&key) {
            return Ok(Some(info.basic()));
        }

        profile_scope!("glyph_cache_miss");
        let Some(mut sprite) = self.sprites.decode(key.image) else {
            debug!(image = key.image, "Glyph failed to decode");
            return Ok(None);
        };
        for pixel in &mut sprite.pixels {
            *pixel = palette.apply(*pixel);
        }
        let Some(slot) = self.load_pixels(sprite.width, sprite.height, &sprite.pixels)? else {
            return Ok(None);
        };

        let info = AtlasTextureInfo { image: key.image, slot };
        self.glyphs.insert(key, info);
        Ok(Some(info.basic()))
    }

    /// Texture info for a text bitmap, re-uploaded whenever its pixels change.
    ///
    /// The replaced cell is only returned to its atlas by
    /// [`release_pending_slots`](Self::release_pending_slots), so draws
    /// recorded earlier in the frame keep sampling the old pixels.
    pub fn get_or_load_bitmap_texture(
        &mut self,
        image: ImageId,
        bitmap: &TextBitmap,
    ) -> Result<Option<BasicTextureInfo>> {
        let index = image.index();
        if let Some(cached) = self.bitmaps.get(&index) {
            if cached.bitmap == *bitmap {
                return Ok(Some(cached.info.basic()));
            }
        }
        if let Some(stale) = self.bitmaps.remove(&index) {
            self.pending_free.push(stale.info.slot);
        }

        profile_scope!("bitmap_cache_miss");
        let Some(slot) = self.load_pixels(bitmap.width, bitmap.height, &bitmap.pixels)? else {
            return Ok(None);
        };
        let info = AtlasTextureInfo { image: index, slot };
        self.bitmaps.insert(
            index,
            CachedBitmap {
                info,
                bitmap: bitmap.clone(),
            },
        );
        Ok(Some(info.basic()))
    }

    /// Drop every cached copy of an image: the sprite, its glyphs and its text
    /// bitmap. The next draw decodes it again.
    pub fn invalidate_image(&mut self, image: ImageId) {
        let index = image.index();

        if let Some(position) = self.lookup(index) {
            let removed = self.entries.swap_remove(position);
            self.free_slot(&removed.slot);
            self.index_map[index as usize] = UNUSED_INDEX;
            if let Some(moved) = self.entries.get(position) {
                self.index_map[moved.image as usize] = position as u32;
            }
            debug_assert!(self.verify_integrity().is_ok());
        }

        let atlases = &mut self.atlases;
        self.glyphs.retain(|key, info| {
            if key.image == index {
                atlases[info.slot.atlas as usize].free(info.slot.slot);
                false
            } else {
                true
            }
        });

        if let Some(bitmap) = self.bitmaps.remove(&index) {
            self.free_slot(&bitmap.info.slot);
        }
    }

    /// Free the cells of replaced bitmaps. Call once recorded draws are flushed.
    pub fn release_pending_slots(&mut self) {
        for slot in std::mem::take(&mut self.pending_free) {
            self.free_slot(&slot);
        }
    }

    fn lookup(&self, index: u32) -> Option<usize> {
        match self.index_map.get(index as usize) {
            Some(&position) if position != UNUSED_INDEX => Some(position as usize),
            _ => None,
        }
    }

    fn free_slot(&mut self, slot: &AtlasSlot) {
        self.atlases[slot.atlas as usize].free(slot.slot);
    }

    /// Allocate a cell and upload tightly packed pixels into it.
    fn load_pixels(&mut self, width: u32, height: u32, pixels: &[u8]) -> Result<Option<AtlasSlot>> {
        if width == 0 || height == 0 {
            return Ok(None);
        }
        PixelDataSizeError::check(width, height, pixels.len())?;
        let Some(slot) = self.allocate_image(width, height)? else {
            return Ok(None);
        };
        self.device.write_texture(
            self.atlas_texture,
            TextureRegion {
                x: slot.bounds.left as u32,
                y: slot.bounds.top as u32,
                width,
                height,
                layer: slot.atlas,
            },
            pixels,
        );
        Ok(Some(slot))
    }

    /// Find a free cell of the image's exact size class, adding an atlas when
    /// every matching one is full.
    pub fn allocate_image(&mut self, width: u32, height: u32) -> Result<Option<AtlasSlot>> {
        let class = size_class(width, height, self.min_slot_size);
        if class > self.atlas_width.min(self.atlas_height) {
            warn!(width, height, class, "Image does not fit in an atlas layer, skipping");
            return Ok(None);
        }

        if let Some(atlas) = self
            .atlases
            .iter_mut()
            .find(|atlas| atlas.image_size() == class && !atlas.is_full())
        {
            return Ok(atlas.allocate(width, height));
        }

        let atlas = self.create_atlas(class)?;
        Ok(atlas.allocate(width, height))
    }

    fn create_atlas(&mut self, image_size: u32) -> Result<&mut Atlas> {
        let index = self.atlases.len() as u32;
        let required = index + 1;
        if required > self.layer_limit {
            return Err(GraphicsError::AtlasLayersExhausted {
                requested: required,
                limit: self.layer_limit,
            });
        }
        if required > self.atlas_layers {
            self.grow_texture_array(required);
        }

        info!(atlas = index, image_size, "Created atlas");
        self.atlases
            .push(Atlas::new(index, image_size, self.atlas_width, self.atlas_height));
        Ok(&mut self.atlases[index as usize])
    }

    fn grow_texture_array(&mut self, layers: u32) {
        profile_scope!("grow_atlas_array");
        let grown = self.device.create_texture(&TextureDescriptor::new_array(
            "Atlas Array",
            self.atlas_width,
            self.atlas_height,
            layers,
            TextureFormat::R8Uint,
        ));
        self.device
            .copy_texture_layers(self.atlas_texture, grown, self.atlas_layers);
        self.device.destroy_texture(self.atlas_texture);
        debug!(from = self.atlas_layers, to = layers, "Grew atlas texture array");
        self.atlas_texture = grown;
        self.atlas_layers = layers;
    }

    /// Check that the dense array and its reverse map agree and that no two
    /// live entries share an atlas cell.
    pub fn verify_integrity(&self) -> std::result::Result<(), String> {
        for (position, entry) in self.entries.iter().enumerate() {
            match self.index_map.get(entry.image as usize) {
                Some(&mapped) if mapped as usize == position => {}
                other => {
                    return Err(format!(
                        "entry {position} for image {} is mapped to {other:?}",
                        entry.image
                    ));
                }
            }
        }
        for (image, &position) in self.index_map.iter().enumerate() {
            if position == UNUSED_INDEX {
                continue;
            }
            match self.entries.get(position as usize) {
                Some(entry) if entry.image as usize == image => {}
                _ => return Err(format!("image {image} maps to dead position {position}")),
            }
        }

        let mut cells = HashSet::default();
        let live = self
            .entries
            .iter()
            .chain(self.glyphs.values())
            .chain(self.bitmaps.values().map(|bitmap| &bitmap.info));
        for info in live {
            if !cells.insert((info.slot.atlas, info.slot.slot)) {
                return Err(format!(
                    "atlas {} slot {} is held twice",
                    info.slot.atlas, info.slot.slot
                ));
            }
        }
        Ok(())
    }

    pub fn atlas_texture(&self) -> TextureHandle {
        self.atlas_texture
    }

    pub fn palette_texture(&self) -> TextureHandle {
        self.palette_texture
    }

    pub fn blend_texture(&self) -> TextureHandle {
        self.blend_texture
    }

    pub fn atlas_count(&self) -> usize {
        self.atlases.len()
    }

    pub fn atlas_layers(&self) -> u32 {
        self.atlas_layers
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn glyph_count(&self) -> usize {
        self.glyphs.len()
    }

    pub fn bitmap_count(&self) -> usize {
        self.bitmaps.len()
    }

    /// Cached sprite entry for an image, without loading it.
    pub fn cached_image(&self, image: ImageId) -> Option<&AtlasTextureInfo> {
        self.lookup(image.index()).map(|position| &self.entries[position])
    }
}

impl Drop for TextureCache {
    fn drop(&mut self) {
        self.device.destroy_texture(self.atlas_texture);
        self.device.destroy_texture(self.palette_texture);
        self.device.destroy_texture(self.blend_texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trackside_test_utils::{MockRenderDevice, StubPalette, StubSprites};

    fn cache_with(config: Config) -> (Arc<MockRenderDevice>, Arc<StubSprites>, TextureCache) {
        let device = Arc::new(MockRenderDevice::new());
        let sprites = Arc::new(StubSprites::new());
        let cache = TextureCache::new(device.clone(), sprites.clone(), &StubPalette::new(), &config).unwrap();
        (device, sprites, cache)
    }

    #[test]
    fn test_hit_does_not_decode_again() {
        let (_, sprites, mut cache) = cache_with(Config::default());
        sprites.insert_solid(7, 8, 8, 3);

        let first = cache.get_or_load_image_texture(ImageId::new(7)).unwrap().unwrap();
        let second = cache.get_or_load_image_texture(ImageId::new(7)).unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(sprites.decode_count(7), 1);
    }

    #[test]
    fn test_modifier_bits_share_entry() {
        let (_, sprites, mut cache) = cache_with(Config::default());
        sprites.insert_solid(7, 8, 8, 3);

        cache.get_or_load_image_texture(ImageId::new(7)).unwrap();
        cache
            .get_or_load_image_texture(ImageId::new(7).with_palette(12))
            .unwrap();
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(sprites.decode_count(7), 1);
    }

    #[test]
    fn test_undecodable_sprite_is_skipped() {
        let (_, _, mut cache) = cache_with(Config::default());
        assert!(cache.get_or_load_image_texture(ImageId::new(3)).unwrap().is_none());
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn test_pixels_land_in_atlas() {
        let (device, sprites, mut cache) = cache_with(Config::default());
        sprites.insert_solid(1, 4, 4, 9);

        let info = cache.get_or_load_image_texture(ImageId::new(1)).unwrap().unwrap();
        assert_eq!(info.index, 0);
        assert_eq!(device.layer_pixel(cache.atlas_texture(), 0, 0, 0), Some(9));
        assert_eq!(device.layer_pixel(cache.atlas_texture(), 0, 3, 3), Some(9));
        assert_eq!(device.layer_pixel(cache.atlas_texture(), 0, 4, 4), Some(0));
    }

    #[test]
    fn test_size_classes_get_separate_atlases() {
        let (_, sprites, mut cache) = cache_with(Config::default());
        sprites.insert_solid(1, 4, 4, 1);
        sprites.insert_solid(2, 30, 20, 1);
        sprites.insert_solid(3, 3, 2, 1);

        let small = cache.get_or_load_image_texture(ImageId::new(1)).unwrap().unwrap();
        let large = cache.get_or_load_image_texture(ImageId::new(2)).unwrap().unwrap();
        let small_again = cache.get_or_load_image_texture(ImageId::new(3)).unwrap().unwrap();
        assert_ne!(small.index, large.index);
        assert_eq!(small.index, small_again.index);
        assert_eq!(cache.atlas_count(), 2);
    }

    #[test]
    fn test_oversized_sprite_is_skipped() {
        let (_, sprites, mut cache) = cache_with(Config::default().with_atlas_size(64, 64));
        sprites.insert_solid(1, 65, 2, 1);
        assert!(cache.get_or_load_image_texture(ImageId::new(1)).unwrap().is_none());
        assert_eq!(cache.atlas_count(), 0);
    }

    #[test]
    fn test_atlas_too_large_for_device() {
        let device = Arc::new(MockRenderDevice::new());
        let config = Config::default().with_atlas_size(16384, 512);
        let result = TextureCache::new(device, Arc::new(StubSprites::new()), &StubPalette::new(), &config);
        assert!(matches!(result, Err(GraphicsError::AtlasTooLarge { size: 16384, .. })));
    }

    #[test]
    fn test_glyphs_keyed_by_palette() {
        let (device, sprites, mut cache) = cache_with(Config::default());
        sprites.insert(
            6,
            trackside_core::sprite::SpriteElement {
                width: 2,
                height: 1,
                ..Default::default()
            },
            vec![1, 2],
        );

        let red = GlyphPalette::new(20, 30);
        let blue = GlyphPalette::new(40, 30);
        let a = cache.get_or_load_glyph_texture(ImageId::new(6), &red).unwrap().unwrap();
        let b = cache.get_or_load_glyph_texture(ImageId::new(6), &blue).unwrap().unwrap();
        let again = cache.get_or_load_glyph_texture(ImageId::new(6), &red).unwrap().unwrap();
        assert_ne!(a, b);
        assert_eq!(a, again);
        assert_eq!(cache.glyph_count(), 2);
        assert_eq!(sprites.decode_count(6), 2);

        // Palette is baked into the uploaded pixels.
        let atlas = cache.atlas_texture();
        let x = (a.normalized_bounds[0] * 1024.0) as i32;
        let y = (a.normalized_bounds[1] * 512.0) as i32;
        assert_eq!(device.layer_pixel(atlas, a.index, x, y), Some(20));
        assert_eq!(device.layer_pixel(atlas, a.index, x + 1, y), Some(30));
    }

    #[test]
    fn test_bitmap_replaced_when_contents_change() {
        let (_, _, mut cache) = cache_with(Config::default());
        let image = ImageId::new(40);
        let hello = TextBitmap::new(2, 2, vec![1, 0, 0, 1]).unwrap();
        let world = TextBitmap::new(2, 2, vec![0, 1, 1, 0]).unwrap();

        let first = cache.get_or_load_bitmap_texture(image, &hello).unwrap().unwrap();
        let same = cache.get_or_load_bitmap_texture(image, &hello).unwrap().unwrap();
        assert_eq!(first, same);

        let replaced = cache.get_or_load_bitmap_texture(image, &world).unwrap().unwrap();
        assert_ne!(first, replaced);
        assert_eq!(cache.bitmap_count(), 1);
        assert!(cache.verify_integrity().is_ok());
    }

    #[test]
    fn test_replaced_bitmap_cell_is_reused_after_release() {
        let (device, _, mut cache) = cache_with(Config::default());
        let image = ImageId::new(40);
        let first = cache
            .get_or_load_bitmap_texture(image, &TextBitmap::new(2, 2, vec![1; 4]).unwrap())
            .unwrap()
            .unwrap();
        let second = cache
            .get_or_load_bitmap_texture(image, &TextBitmap::new(2, 2, vec![0; 4]).unwrap())
            .unwrap()
            .unwrap();
        // Old pixels stay put until the pending cell is released
        let x = (first.normalized_bounds[0] * 1024.0) as i32;
        let y = (first.normalized_bounds[1] * 512.0) as i32;
        assert_eq!(device.layer_pixel(cache.atlas_texture(), first.index, x, y), Some(1));

        cache.release_pending_slots();
        let third = cache
            .get_or_load_bitmap_texture(image, &TextBitmap::new(2, 2, vec![1; 4]).unwrap())
            .unwrap()
            .unwrap();
        assert_ne!(second, third);
        assert_eq!(first, third);
    }

    #[test]
    fn test_short_pixel_buffer_is_rejected() {
        let (device, _, mut cache) = cache_with(Config::default());
        assert!(TextBitmap::new(3, 3, vec![1; 8]).is_err());

        let short = TextBitmap {
            width: 3,
            height: 3,
            pixels: vec![1; 8],
        };
        let error = cache.get_or_load_bitmap_texture(ImageId::new(2), &short).unwrap_err();
        assert!(matches!(error, GraphicsError::PixelData(PixelDataSizeError { len: 8, .. })));
        assert_eq!(cache.bitmap_count(), 0);
        assert_eq!(cache.atlas_count(), 0);
        assert!(device.take_error().is_none());
    }

    #[test]
    fn test_invalidate_frees_glyphs_and_bitmaps() {
        let (_, sprites, mut cache) = cache_with(Config::default());
        sprites.insert_solid(9, 4, 4, 1);
        let image = ImageId::new(9);
        cache.get_or_load_image_texture(image).unwrap();
        cache
            .get_or_load_glyph_texture(image, &GlyphPalette::new(1, 2))
            .unwrap();
        cache
            .get_or_load_bitmap_texture(image, &TextBitmap::new(1, 1, vec![1]).unwrap())
            .unwrap();

        cache.invalidate_image(image);
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.glyph_count(), 0);
        assert_eq!(cache.bitmap_count(), 0);
        assert!(cache.cached_image(image).is_none());
    }

    #[test]
    fn test_palette_rows_are_offset_by_one() {
        let device = Arc::new(MockRenderDevice::new());
        let palette = StubPalette::new().with_remap_fn(FilterPaletteId(0), |_| 77);
        let cache = TextureCache::new(
            device.clone(),
            Arc::new(StubSprites::new()),
            &palette,
            &Config::default(),
        )
        .unwrap();
        let texture = cache.palette_texture();
        assert_eq!(device.pixel(texture, 5, 0), Some(5));
        assert_eq!(device.pixel(texture, 5, 1), Some(77));
        assert_eq!(device.pixel(texture, 5, 2), Some(5));
    }

    #[test]
    fn test_drop_releases_textures() {
        let (device, _, cache) = cache_with(Config::default());
        assert_eq!(device.live_texture_count(), 3);
        drop(cache);
        assert_eq!(device.live_texture_count(), 0);
    }
}
