use std::ops::Mul;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size<T> {
    pub width: T,
    pub height: T,
}

impl<T> Size<T> {
    pub fn new(width: T, height: T) -> Self {
        Size { width, height }
    }

    pub fn cast<U: From<T>>(self) -> Size<U> {
        Size {
            width: U::from(self.width),
            height: U::from(self.height),
        }
    }
}

impl<T: Mul + Copy> Mul<T> for Size<T> {
    type Output = Size<<T as Mul>::Output>;

    fn mul(self, rhs: T) -> Self::Output {
        Size {
            width: self.width * rhs,
            height: self.height * rhs,
        }
    }
}

/// Screen-space rectangle stored as edges, `[left, right) x [top, bottom)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Bounds {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_array(edges: [i32; 4]) -> Self {
        Bounds::new(edges[0], edges[1], edges[2], edges[3])
    }

    pub fn to_array(self) -> [i32; 4] {
        [self.left, self.top, self.right, self.bottom]
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// True when the rectangle covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    pub fn intersect(&self, other: &Bounds) -> Bounds {
        Bounds {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    /// Swaps edges so that `left <= right` and `top <= bottom`.
    pub fn normalized(self) -> Bounds {
        Bounds {
            left: self.left.min(self.right),
            top: self.top.min(self.bottom),
            right: self.left.max(self.right),
            bottom: self.top.max(self.bottom),
        }
    }

    /// Offset every edge, saturating at the `i32` range.
    pub fn translate(self, dx: i32, dy: i32) -> Bounds {
        Bounds {
            left: self.left.saturating_add(dx),
            top: self.top.saturating_add(dy),
            right: self.right.saturating_add(dx),
            bottom: self.bottom.saturating_add(dy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersect_disjoint_is_empty() {
        let a = Bounds::new(0, 0, 10, 10);
        let b = Bounds::new(10, 0, 20, 10);
        assert!(a.intersect(&b).is_empty());
    }

    #[test]
    fn test_intersect_overlap() {
        let a = Bounds::new(0, 0, 10, 10);
        let b = Bounds::new(5, 5, 15, 15);
        assert_eq!(a.intersect(&b), Bounds::new(5, 5, 10, 10));
    }

    #[test]
    fn test_normalized_swaps_edges() {
        let b = Bounds::new(10, 8, 2, 4).normalized();
        assert_eq!(b, Bounds::new(2, 4, 10, 8));
    }

    #[test]
    fn test_contains_is_half_open() {
        let b = Bounds::new(0, 0, 4, 4);
        assert!(b.contains(0, 0));
        assert!(b.contains(3, 3));
        assert!(!b.contains(4, 3));
    }

    #[test]
    fn test_translate_saturates() {
        let b = Bounds::new(0, 0, i32::MAX, 4).translate(10, -10);
        assert_eq!(b, Bounds::new(10, -10, i32::MAX, -6));
    }

    #[test]
    fn test_size_mul() {
        let s = Size::new(3u32, 4u32) * 2;
        assert_eq!(s, Size::new(6, 8));
    }
}
