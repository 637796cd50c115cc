//! One layer of the sprite atlas, split into a grid of equal square cells.

use trackside_core::geometry::Bounds;

/// Side length of the square cell a `width x height` image needs.
///
/// Cells are powers of two no smaller than `min_slot_size`.
pub fn size_class(width: u32, height: u32, min_slot_size: u32) -> u32 {
    width.max(height).max(min_slot_size).max(1).next_power_of_two()
}

/// A slot handed out by an [`Atlas`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtlasSlot {
    /// Atlas index, which is also the texture array layer.
    pub atlas: u32,
    pub slot: u32,
    /// Pixel bounds of the image inside the layer, `right`/`bottom` exclusive.
    pub bounds: Bounds,
    /// `bounds` divided by the layer size.
    pub normalized_bounds: [f32; 4],
}

#[derive(Debug)]
pub struct Atlas {
    index: u32,
    image_size: u32,
    width: u32,
    height: u32,
    cols: u32,
    rows: u32,
    free_slots: Vec<u32>,
}

impl Atlas {
    /// Create an atlas of `width x height` pixels holding cells of `image_size`.
    pub fn new(index: u32, image_size: u32, width: u32, height: u32) -> Self {
        let cols = width / image_size.max(1);
        let rows = height / image_size.max(1);
        // Popped from the back, so slot 0 goes out first.
        let free_slots = (0..cols * rows).rev().collect();
        Self {
            index,
            image_size,
            width,
            height,
            cols,
            rows,
            free_slots,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    pub fn capacity(&self) -> u32 {
        self.cols * self.rows
    }

    pub fn free_slot_count(&self) -> usize {
        self.free_slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.free_slots.is_empty()
    }

    /// Whether an image of this size belongs in this atlas's size class.
    pub fn is_image_size(&self, width: u32, height: u32, min_slot_size: u32) -> bool {
        size_class(width, height, min_slot_size) == self.image_size
    }

    /// Take a free cell for a `width x height` image.
    pub fn allocate(&mut self, width: u32, height: u32) -> Option<AtlasSlot> {
        debug_assert!(width <= self.image_size && height <= self.image_size);
        let slot = self.free_slots.pop()?;
        let col = slot % self.cols;
        let row = slot / self.cols;
        let left = (col * self.image_size) as i32;
        let top = (row * self.image_size) as i32;
        let bounds = Bounds::new(left, top, left + width as i32, top + height as i32);
        Some(AtlasSlot {
            atlas: self.index,
            slot,
            bounds,
            normalized_bounds: self.normalize(&bounds),
        })
    }

    /// Return a cell to the free list.
    pub fn free(&mut self, slot: u32) {
        debug_assert!(slot < self.capacity());
        debug_assert!(!self.free_slots.contains(&slot), "slot {slot} freed twice");
        self.free_slots.push(slot);
    }

    fn normalize(&self, bounds: &Bounds) -> [f32; 4] {
        let width = self.width as f32;
        let height = self.height as f32;
        [
            bounds.left as f32 / width,
            bounds.top as f32 / height,
            bounds.right as f32 / width,
            bounds.bottom as f32 / height,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_class_is_power_of_two() {
        assert_eq!(size_class(1, 1, 4), 4);
        assert_eq!(size_class(5, 3, 4), 8);
        assert_eq!(size_class(16, 16, 4), 16);
        assert_eq!(size_class(17, 2, 4), 32);
        assert_eq!(size_class(0, 0, 0), 1);
    }

    #[test]
    fn test_grid_capacity() {
        let atlas = Atlas::new(0, 64, 1024, 512);
        assert_eq!(atlas.capacity(), 16 * 8);
        assert_eq!(atlas.free_slot_count(), 128);
    }

    #[test]
    fn test_allocation_bounds() {
        let mut atlas = Atlas::new(2, 32, 128, 64);
        let first = atlas.allocate(20, 10).unwrap();
        assert_eq!(first.atlas, 2);
        assert_eq!(first.slot, 0);
        assert_eq!(first.bounds, Bounds::new(0, 0, 20, 10));

        let second = atlas.allocate(32, 32).unwrap();
        assert_eq!(second.slot, 1);
        assert_eq!(second.bounds, Bounds::new(32, 0, 64, 32));
        assert_eq!(second.normalized_bounds, [0.25, 0.0, 0.5, 0.5]);
    }

    #[test]
    fn test_second_row_starts_after_last_column() {
        let mut atlas = Atlas::new(0, 32, 64, 64);
        for _ in 0..2 {
            atlas.allocate(32, 32).unwrap();
        }
        let slot = atlas.allocate(8, 8).unwrap();
        assert_eq!(slot.slot, 2);
        assert_eq!(slot.bounds, Bounds::new(0, 32, 8, 40));
    }

    #[test]
    fn test_free_list_is_lifo() {
        let mut atlas = Atlas::new(0, 16, 64, 16);
        let a = atlas.allocate(16, 16).unwrap();
        let b = atlas.allocate(16, 16).unwrap();
        atlas.free(a.slot);
        atlas.free(b.slot);
        assert_eq!(atlas.allocate(4, 4).unwrap().slot, b.slot);
        assert_eq!(atlas.allocate(4, 4).unwrap().slot, a.slot);
    }

    #[test]
    fn test_full_atlas_refuses() {
        let mut atlas = Atlas::new(0, 64, 64, 64);
        assert!(atlas.allocate(64, 64).is_some());
        assert!(atlas.is_full());
        assert!(atlas.allocate(1, 1).is_none());
    }

    #[test]
    fn test_exact_class_only() {
        let atlas = Atlas::new(0, 16, 256, 256);
        assert!(atlas.is_image_size(9, 16, 4));
        assert!(!atlas.is_image_size(4, 4, 4));
        assert!(!atlas.is_image_size(17, 1, 4));
    }
}
