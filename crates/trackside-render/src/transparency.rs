//! Upper bound on how many translucent rects stack on one pixel.
//!
//! The peel loop runs once per layer, so this decides how many full passes
//! over the translucent batch a frame costs.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included, Unbounded};

use trackside_core::geometry::Bounds;
use trackside_core::gpu::DrawRectInstance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EventKind {
    // Ends sort first so rects that only touch do not count as overlapping.
    End,
    Begin,
}

#[derive(Debug, Clone, Copy)]
struct Event {
    x: i32,
    kind: EventKind,
    top: i32,
    bottom: i32,
}

#[derive(Debug, Clone, Copy, Default)]
struct YData {
    /// Active intervals with an endpoint at this key.
    refs: u32,
    /// Number of active intervals covering `[key, next key)`.
    depth: u32,
}

/// The largest number of instances covering any single pixel, at least 1.
///
/// Each instance covers `bounds` intersected with `clip`; empty boxes are
/// ignored. Sweeps the boxes left to right, keeping the y-intervals of the
/// active ones in an ordered map.
pub fn max_transparency_depth(instances: &[DrawRectInstance]) -> u32 {
    let mut events = Vec::with_capacity(instances.len() * 2);
    for instance in instances {
        let area = Bounds::from_array(instance.bounds).intersect(&Bounds::from_array(instance.clip));
        if area.is_empty() {
            continue;
        }
        events.push(Event {
            x: area.left,
            kind: EventKind::Begin,
            top: area.top,
            bottom: area.bottom,
        });
        events.push(Event {
            x: area.right,
            kind: EventKind::End,
            top: area.top,
            bottom: area.bottom,
        });
    }
    events.sort_unstable_by_key(|event| (event.x, event.kind));

    let mut y_data: BTreeMap<i32, YData> = BTreeMap::new();
    let mut max_depth = 0;
    for event in &events {
        match event.kind {
            EventKind::Begin => {
                insert_endpoint(&mut y_data, event.top);
                insert_endpoint(&mut y_data, event.bottom);
                for (_, data) in y_data.range_mut((Included(event.top), Excluded(event.bottom))) {
                    data.depth += 1;
                    max_depth = max_depth.max(data.depth);
                }
            }
            EventKind::End => {
                for (_, data) in y_data.range_mut((Included(event.top), Excluded(event.bottom))) {
                    data.depth -= 1;
                }
                release_endpoint(&mut y_data, event.top);
                release_endpoint(&mut y_data, event.bottom);
            }
        }
    }

    max_depth.max(1)
}

/// Add a reference to `y`, splitting the segment it falls in.
fn insert_endpoint(y_data: &mut BTreeMap<i32, YData>, y: i32) {
    if let Some(data) = y_data.get_mut(&y) {
        data.refs += 1;
        return;
    }
    let depth = y_data
        .range((Unbounded, Excluded(y)))
        .next_back()
        .map_or(0, |(_, data)| data.depth);
    y_data.insert(y, YData { refs: 1, depth });
}

/// Drop a reference to `y`. Once nothing starts or ends there the key is
/// removed, which merges its segment back into the one above.
fn release_endpoint(y_data: &mut BTreeMap<i32, YData>, y: i32) {
    if let Some(data) = y_data.get_mut(&y) {
        data.refs -= 1;
        if data.refs == 0 {
            y_data.remove(&y);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(left: i32, top: i32, right: i32, bottom: i32) -> DrawRectInstance {
        DrawRectInstance {
            clip: [i32::MIN / 2, i32::MIN / 2, i32::MAX / 2, i32::MAX / 2],
            bounds: [left, top, right, bottom],
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_batch_needs_one_pass() {
        assert_eq!(max_transparency_depth(&[]), 1);
    }

    #[test]
    fn test_identical_rects_stack() {
        let rects = vec![rect(0, 0, 10, 10); 5];
        assert_eq!(max_transparency_depth(&rects), 5);
    }

    #[test]
    fn test_touching_rects_do_not_overlap() {
        let rects = [rect(0, 0, 10, 10), rect(10, 0, 20, 10), rect(0, 10, 10, 20)];
        assert_eq!(max_transparency_depth(&rects), 1);
    }

    #[test]
    fn test_partial_overlap() {
        let rects = [rect(0, 0, 10, 10), rect(5, 5, 15, 15), rect(8, 8, 20, 20), rect(30, 30, 40, 40)];
        assert_eq!(max_transparency_depth(&rects), 3);
    }

    #[test]
    fn test_nested_interval_inside_taller_one() {
        let rects = [rect(0, 0, 10, 100), rect(2, 40, 8, 50), rect(3, 45, 4, 46)];
        assert_eq!(max_transparency_depth(&rects), 3);
    }

    #[test]
    fn test_clip_removes_overlap() {
        let mut clipped = rect(0, 0, 10, 10);
        clipped.clip = [20, 20, 30, 30];
        let rects = [rect(0, 0, 10, 10), clipped];
        assert_eq!(max_transparency_depth(&rects), 1);
    }

    #[test]
    fn test_depth_drops_after_rects_end() {
        // Two stacks of two, separated in x; max is 2, not 4.
        let rects = [
            rect(0, 0, 5, 5),
            rect(0, 0, 5, 5),
            rect(6, 0, 10, 5),
            rect(6, 0, 10, 5),
        ];
        assert_eq!(max_transparency_depth(&rects), 2);
    }
}
