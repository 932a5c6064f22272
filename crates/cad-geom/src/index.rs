//! Bounding-box R-tree for pair-wise candidate pruning.
//!
//! The reconciler loads one entry per boundary (id + bbox) and asks for the
//! ids whose boxes intersect a query polygon's box; only those candidates are
//! handed to the boolean engine.

use geo::BoundingRect;
use geo_types::Polygon;
use rstar::{RTree, RTreeObject, AABB};

#[derive(Clone, Debug)]
struct BboxEntry {
    id: i64,
    env: AABB<[f64; 2]>,
}

impl RTreeObject for BboxEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

/// Immutable bbox index over boundary ids.
pub struct BboxIndex {
    tree: RTree<BboxEntry>,
}

impl BboxIndex {
    /// Bulk-load from `(id, polygon)` pairs; polygons without a bounding box
    /// (empty rings) are skipped.
    pub fn build<'a, I>(items: I) -> Self
    where
        I: IntoIterator<Item = (i64, &'a Polygon<f64>)>,
    {
        let entries: Vec<BboxEntry> = items
            .into_iter()
            .filter_map(|(id, poly)| {
                let rect = poly.bounding_rect()?;
                Some(BboxEntry {
                    id,
                    env: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Ids whose bounding boxes intersect the bounding box of `poly`.
    pub fn candidates(&self, poly: &Polygon<f64>) -> Vec<i64> {
        let Some(rect) = poly.bounding_rect() else {
            return Vec::new();
        };
        let env = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        self.tree
            .locate_in_envelope_intersecting(&env)
            .map(|e| e.id)
            .collect()
    }
}
