//! In-memory spatial index over grid cells.
//!
//! Builds an R-tree of cell envelopes once per aggregation run and
//! provides strict point-in-polygon lookups. The index is immutable for
//! the duration of the stage.

use geo::{BoundingRect, Contains, MultiPolygon, Point};
use hotspot_models::HexGrid;
use rstar::{AABB, RTree, RTreeObject};

/// A grid cell stored in the R-tree.
struct CellEntry {
    cell_id: u32,
    envelope: AABB<[f64; 2]>,
    geometry: MultiPolygon<f64>,
}

impl RTreeObject for CellEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Pre-built R-tree index for cell lookups.
pub struct CellIndex {
    tree: RTree<CellEntry>,
}

impl CellIndex {
    /// Builds the index from a grid.
    #[must_use]
    pub fn build(grid: &HexGrid) -> Self {
        let entries = grid
            .cells()
            .iter()
            .map(|cell| CellEntry {
                cell_id: cell.cell_id,
                envelope: compute_envelope(&cell.geometry),
                geometry: cell.geometry.clone(),
            })
            .collect();
        let tree = RTree::bulk_load(entries);
        log::debug!("Built cell index over {} cells", tree.size());
        Self { tree }
    }

    /// Returns the `cell_id` whose geometry strictly contains the point.
    ///
    /// Cells tile the region without overlap, so the first match wins.
    /// A point exactly on a shared cell edge is inside no cell and
    /// returns `None`; edge events belong to neither adjoining cell.
    #[must_use]
    pub fn locate(&self, x: f64, y: f64) -> Option<u32> {
        let point = Point::new(x, y);
        let query_env = AABB::from_point([x, y]);

        for entry in self.tree.locate_in_envelope_intersecting(&query_env) {
            if entry.geometry.contains(&point) {
                return Some(entry.cell_id);
            }
        }
        None
    }

    /// Number of indexed cells.
    #[must_use]
    pub fn size(&self) -> usize {
        self.tree.size()
    }
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
fn compute_envelope(geometry: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    geometry.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}
