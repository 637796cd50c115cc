//! Palette ids and the palette provider contract.

/// Number of entries in the game palette and in every remap table.
pub const PALETTE_SIZE: usize = 256;

/// Id of a remap or filter palette. Colour remaps and glass/filter palettes
/// share one id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterPaletteId(pub u8);

impl FilterPaletteId {
    pub const WATER: FilterPaletteId = FilterPaletteId(32);
    /// First of the translucent glass palettes, one per remap colour.
    pub const GLASS_BASE: u8 = 50;

    /// Translucent glass tint for a remap colour.
    pub fn glass(colour: u8) -> Self {
        FilterPaletteId(Self::GLASS_BASE.saturating_add(colour))
    }

    /// Row of the remap texture holding this palette. Row 0 is identity.
    #[inline]
    pub fn row(self) -> i32 {
        self.0 as i32 + 1
    }
}

/// Remap texture rows: the identity row plus one per palette id.
pub const PALETTE_ROWS: u32 = PALETTE_SIZE as u32 + 1;

/// Eight colours applied to the pixel values of a font glyph.
///
/// Glyph pixels hold values `1..=7`; each is replaced by the matching entry.
/// The whole array takes part in glyph cache identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GlyphPalette(pub [u8; 8]);

impl GlyphPalette {
    /// Foreground colour on pixel value 1, shadow/outline on 2 and 3.
    pub fn new(foreground: u8, outline: u8) -> Self {
        GlyphPalette([0, foreground, outline, outline, 0, 0, 0, 0])
    }

    pub fn apply(&self, pixel: u8) -> u8 {
        match pixel {
            0 => 0,
            1..=7 => self.0[pixel as usize],
            other => other,
        }
    }
}

/// Read access to palette data owned by the game.
pub trait PaletteSource: Send + Sync {
    /// The RGBA colour of every palette index.
    fn colours(&self) -> [[u8; 4]; PALETTE_SIZE];

    /// Index-to-index table for a remap palette, `None` when the id is unused.
    fn remap_table(&self, palette: FilterPaletteId) -> Option<[u8; PALETTE_SIZE]>;

    /// Row-major `256 x 256` table: `blend[a * 256 + b]` mixes index `a` with `b`.
    fn blend_table(&self) -> Option<Vec<u8>>;
}
