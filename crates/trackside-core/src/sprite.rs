//! Sprite identifiers and the sprite-data provider contract.

use bitflags::bitflags;
use thiserror::Error;

/// Image identifier as issued by paint code.
///
/// The low 19 bits index the sprite table; the remaining bits carry palette
/// remap ids and type flags that only affect how the sprite is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageId(pub u32);

impl ImageId {
    pub const INDEX_MASK: u32 = 0x7FFFF;
    pub const REMAP: u32 = 1 << 29;
    pub const TRANSPARENT: u32 = 1 << 30;
    pub const REMAP_2_PLUS: u32 = 1 << 31;

    pub fn new(index: u32) -> Self {
        ImageId(index & Self::INDEX_MASK)
    }

    /// Sprite table index, the part that identifies the pixels.
    #[inline]
    pub fn index(self) -> u32 {
        self.0 & Self::INDEX_MASK
    }

    /// Same modifier bits, different sprite.
    pub fn with_index(self, index: u32) -> Self {
        ImageId((self.0 & !Self::INDEX_MASK) | (index & Self::INDEX_MASK))
    }

    /// Single remap palette, as used by `REMAP` and `TRANSPARENT` images.
    pub fn with_palette(self, palette: u8) -> Self {
        ImageId((self.0 & !(0xFF << 19)) | (palette as u32) << 19 | Self::REMAP)
    }

    /// Primary and secondary remap colours, as used by `REMAP_2_PLUS` images.
    pub fn with_colours(self, primary: u8, secondary: u8) -> Self {
        let cleared = self.0 & !(0x3FF << 19);
        ImageId(
            cleared
                | ((primary as u32) & 0x1F) << 19
                | ((secondary as u32) & 0x1F) << 24
                | Self::REMAP_2_PLUS,
        )
    }

    pub fn transparent(self) -> Self {
        ImageId(self.0 | Self::TRANSPARENT)
    }

    pub fn is_remap(self) -> bool {
        self.0 & Self::REMAP != 0
    }

    pub fn is_transparent(self) -> bool {
        self.0 & Self::TRANSPARENT != 0
    }

    pub fn is_remap_2_plus(self) -> bool {
        self.0 & Self::REMAP_2_PLUS != 0
    }

    pub fn palette(self) -> u8 {
        ((self.0 >> 19) & 0xFF) as u8
    }

    pub fn primary_colour(self) -> u8 {
        ((self.0 >> 19) & 0x1F) as u8
    }

    pub fn secondary_colour(self) -> u8 {
        ((self.0 >> 24) & 0x1F) as u8
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SpriteFlags: u16 {
        const HAS_TRANSPARENCY = 1 << 0;
        const RLE_COMPRESSION = 1 << 2;
        /// A half-size copy lives `zoomed_offset` entries before this one.
        const HAS_ZOOM_SPRITE = 1 << 4;
        /// Not drawn at all when zoomed out.
        const NO_ZOOM_DRAW = 1 << 5;
    }
}

/// Placement and flags of one sprite table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpriteElement {
    pub x_offset: i32,
    pub y_offset: i32,
    pub width: i32,
    pub height: i32,
    pub flags: SpriteFlags,
    pub zoomed_offset: u32,
}

/// Palette-index pixels of one decoded sprite, row-major and tightly packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSprite {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedSprite {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, PixelDataSizeError> {
        PixelDataSizeError::check(width, height, pixels.len())?;
        Ok(Self {
            width,
            height,
            pixels,
        })
    }
}

/// Pixel buffer length does not match one byte per pixel.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{len} pixel bytes for a {width}x{height} image")]
pub struct PixelDataSizeError {
    pub width: u32,
    pub height: u32,
    pub len: usize,
}

impl PixelDataSizeError {
    pub fn check(width: u32, height: u32, len: usize) -> Result<(), Self> {
        if width as u64 * height as u64 == len as u64 {
            Ok(())
        } else {
            Err(Self { width, height, len })
        }
    }
}

/// Read access to the loaded sprite table.
///
/// Both lookups take the sprite table index (see [`ImageId::index`]). A `None`
/// means the sprite is missing and the draw is skipped.
pub trait SpriteSource: Send + Sync {
    fn element(&self, index: u32) -> Option<SpriteElement>;

    fn decode(&self, index: u32) -> Option<DecodedSprite>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoded_sprite_rejects_short_buffer() {
        assert!(DecodedSprite::new(2, 2, vec![0; 4]).is_ok());
        assert_eq!(
            DecodedSprite::new(3, 2, vec![0; 4]).unwrap_err(),
            PixelDataSizeError {
                width: 3,
                height: 2,
                len: 4
            }
        );
    }

    #[test]
    fn test_index_ignores_modifier_bits() {
        let id = ImageId(0x1234 | ImageId::TRANSPARENT | (7 << 19));
        assert_eq!(id.index(), 0x1234);
        assert!(id.is_transparent());
        assert_eq!(id.palette(), 7);
    }

    #[test]
    fn test_with_index_keeps_modifiers() {
        let id = ImageId::new(100).with_palette(45).with_index(80);
        assert_eq!(id.index(), 80);
        assert_eq!(id.palette(), 45);
        assert!(id.is_remap());
    }

    #[test]
    fn test_two_colour_remap() {
        let id = ImageId::new(9).with_colours(3, 30);
        assert!(id.is_remap_2_plus());
        assert_eq!(id.primary_colour(), 3);
        assert_eq!(id.secondary_colour(), 30);
    }
}
