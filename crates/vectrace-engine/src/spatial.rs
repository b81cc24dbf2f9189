//! R-tree over bounding boxes for overlap queries.

use rstar::RTree;
use rstar::primitives::{GeomWithData, Rectangle};

use crate::types::BoundingBox;

type IndexedBox = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Bounding boxes keyed by caller-chosen ids.
#[derive(Debug, Default)]
pub struct BoxIndex {
    tree: RTree<IndexedBox>,
}

impl BoxIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(id, box)` pairs in one pass.
    #[must_use]
    pub fn bulk_load(boxes: impl IntoIterator<Item = (usize, BoundingBox)>) -> Self {
        let items = boxes.into_iter().map(|(id, b)| indexed(id, &b)).collect();
        Self {
            tree: RTree::bulk_load(items),
        }
    }

    pub fn insert(&mut self, id: usize, bounds: &BoundingBox) {
        self.tree.insert(indexed(id, bounds));
    }

    /// Ids of boxes that may intersect `bounds`, ascending.
    ///
    /// Every box intersecting `bounds` is returned; boxes that merely
    /// touch it may be included too, so callers still measure overlap.
    #[must_use]
    pub fn candidates(&self, bounds: &BoundingBox) -> Vec<usize> {
        let center = bounds.center();
        let (hw, hh) = (bounds.width() / 2.0, bounds.height() / 2.0);
        // Any box sharing area with `bounds` contains a point within the
        // half-diagonal of its center.
        let reach = hw.mul_add(hw, hh * hh) + 1e-9;
        let mut ids: Vec<usize> = self
            .tree
            .nearest_neighbor_iter_with_distance_2(&[center.x, center.y])
            .take_while(|&(_, d2)| d2 <= reach)
            .map(|(item, _)| item.data)
            .collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

fn indexed(id: usize, b: &BoundingBox) -> IndexedBox {
    GeomWithData::new(
        Rectangle::from_corners([b.min_x, b.min_y], [b.max_x, b.max_y]),
        id,
    )
}
