//! In-memory sprite and palette providers.

use ahash::HashMap;
use parking_lot::Mutex;
use trackside_core::palette::{FilterPaletteId, PALETTE_SIZE, PaletteSource};
use trackside_core::sprite::{DecodedSprite, SpriteElement, SpriteFlags, SpriteSource};

#[derive(Debug, Clone)]
struct StubSprite {
    element: SpriteElement,
    pixels: Option<Vec<u8>>,
}

/// Sprite table backed by a map, counting every decode.
///
/// ```rust
/// use trackside_core::sprite::SpriteSource;
/// use trackside_test_utils::StubSprites;
///
/// let sprites = StubSprites::new();
/// sprites.insert_solid(1, 4, 4, 12);
///
/// assert!(sprites.decode(1).is_some());
/// assert_eq!(sprites.decode_count(1), 1);
/// ```
#[derive(Default)]
pub struct StubSprites {
    sprites: Mutex<HashMap<u32, StubSprite>>,
    decodes: Mutex<HashMap<u32, usize>>,
}

impl StubSprites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, index: u32, element: SpriteElement, pixels: Vec<u8>) {
        debug_assert_eq!(pixels.len(), (element.width * element.height) as usize);
        self.sprites.lock().insert(
            index,
            StubSprite {
                element,
                pixels: Some(pixels),
            },
        );
    }

    /// A `width x height` sprite filled with one colour, anchored at its origin.
    pub fn insert_solid(&self, index: u32, width: i32, height: i32, colour: u8) {
        let element = SpriteElement {
            width,
            height,
            ..Default::default()
        };
        self.insert(index, element, vec![colour; (width * height) as usize]);
    }

    /// An element whose pixels fail to decode.
    pub fn insert_undecodable(&self, index: u32, element: SpriteElement) {
        self.sprites.lock().insert(
            index,
            StubSprite {
                element,
                pixels: None,
            },
        );
    }

    /// Give a sprite a half-size variant stored `offset` entries earlier.
    pub fn set_zoomed(&self, index: u32, offset: u32) {
        if let Some(sprite) = self.sprites.lock().get_mut(&index) {
            sprite.element.flags |= SpriteFlags::HAS_ZOOM_SPRITE;
            sprite.element.zoomed_offset = offset;
        }
    }

    pub fn set_flags(&self, index: u32, flags: SpriteFlags) {
        if let Some(sprite) = self.sprites.lock().get_mut(&index) {
            sprite.element.flags |= flags;
        }
    }

    /// Replace a sprite's pixels in place, as a reloaded sprite sheet would.
    pub fn replace_pixels(&self, index: u32, pixels: Vec<u8>) {
        if let Some(sprite) = self.sprites.lock().get_mut(&index) {
            sprite.pixels = Some(pixels);
        }
    }

    pub fn decode_count(&self, index: u32) -> usize {
        self.decodes.lock().get(&index).copied().unwrap_or(0)
    }

    pub fn total_decodes(&self) -> usize {
        self.decodes.lock().values().sum()
    }
}

impl SpriteSource for StubSprites {
    fn element(&self, index: u32) -> Option<SpriteElement> {
        self.sprites.lock().get(&index).map(|sprite| sprite.element)
    }

    fn decode(&self, index: u32) -> Option<DecodedSprite> {
        *self.decodes.lock().entry(index).or_insert(0) += 1;
        let sprites = self.sprites.lock();
        let sprite = sprites.get(&index)?;
        let pixels = sprite.pixels.clone()?;
        DecodedSprite::new(sprite.element.width as u32, sprite.element.height as u32, pixels).ok()
    }
}

/// Palette provider with explicit remap tables and an optional blend table.
pub struct StubPalette {
    colours: [[u8; 4]; PALETTE_SIZE],
    remaps: HashMap<u8, [u8; PALETTE_SIZE]>,
    blend: Option<Vec<u8>>,
}

impl StubPalette {
    /// Greyscale colours, no remaps and no blend table.
    pub fn new() -> Self {
        let mut colours = [[0u8; 4]; PALETTE_SIZE];
        for (index, colour) in colours.iter_mut().enumerate() {
            let v = index as u8;
            *colour = [v, v, v, 255];
        }
        Self {
            colours,
            remaps: HashMap::default(),
            blend: None,
        }
    }

    pub fn with_remap(mut self, palette: FilterPaletteId, table: [u8; PALETTE_SIZE]) -> Self {
        self.remaps.insert(palette.0, table);
        self
    }

    /// Remap table built from a per-index function.
    pub fn with_remap_fn(self, palette: FilterPaletteId, f: impl Fn(u8) -> u8) -> Self {
        let mut table = [0u8; PALETTE_SIZE];
        for (index, entry) in table.iter_mut().enumerate() {
            *entry = f(index as u8);
        }
        self.with_remap(palette, table)
    }

    /// Blend table built from `f(a, b)`.
    pub fn with_blend_fn(mut self, f: impl Fn(u8, u8) -> u8) -> Self {
        let mut table = vec![0u8; PALETTE_SIZE * PALETTE_SIZE];
        for a in 0..PALETTE_SIZE {
            for b in 0..PALETTE_SIZE {
                table[a * PALETTE_SIZE + b] = f(a as u8, b as u8);
            }
        }
        self.blend = Some(table);
        self
    }
}

impl Default for StubPalette {
    fn default() -> Self {
        Self::new()
    }
}

impl PaletteSource for StubPalette {
    fn colours(&self) -> [[u8; 4]; PALETTE_SIZE] {
        self.colours
    }

    fn remap_table(&self, palette: FilterPaletteId) -> Option<[u8; PALETTE_SIZE]> {
        self.remaps.get(&palette.0).copied()
    }

    fn blend_table(&self) -> Option<Vec<u8>> {
        self.blend.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_is_counted_even_when_missing() {
        let sprites = StubSprites::new();
        assert!(sprites.decode(5).is_none());
        assert_eq!(sprites.decode_count(5), 1);
    }

    #[test]
    fn test_undecodable_sprite_has_element() {
        let sprites = StubSprites::new();
        sprites.insert_undecodable(
            3,
            SpriteElement {
                width: 2,
                height: 2,
                ..Default::default()
            },
        );
        assert!(sprites.element(3).is_some());
        assert!(sprites.decode(3).is_none());
    }

    #[test]
    fn test_remap_fn_builds_table() {
        let palette = StubPalette::new().with_remap_fn(FilterPaletteId(4), |i| i.wrapping_add(1));
        let table = palette.remap_table(FilterPaletteId(4)).unwrap();
        assert_eq!(table[0], 1);
        assert_eq!(table[255], 0);
        assert!(palette.remap_table(FilterPaletteId(5)).is_none());
    }
}
