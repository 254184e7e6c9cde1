//! GeoJSON grid store.
//!
//! One feature per cell with a `cell_id` property. The identifier is the
//! durable join key: the loader sorts by it and re-validates that the ids
//! are unique and contiguous, rather than trusting whatever row order the
//! file happens to have.

use std::path::Path;

use geo::MultiPolygon;
use geojson::{Feature, FeatureCollection, GeoJson};
use hotspot_models::{GridCell, HexGrid};

use crate::StoreError;

/// Writes the grid as a GeoJSON `FeatureCollection`.
///
/// # Errors
///
/// Returns a [`StoreError`] if serialization or the file write fails.
pub fn save_grid(grid: &HexGrid, path: &Path) -> Result<(), StoreError> {
    let features: Vec<Feature> = grid
        .cells()
        .iter()
        .map(|cell| {
            let mut properties = serde_json::Map::new();
            properties.insert(
                "cell_id".to_string(),
                serde_json::Value::from(cell.cell_id),
            );
            Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::from(
                    &cell.geometry,
                ))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };

    std::fs::write(path, serde_json::to_string(&collection)?)?;
    log::info!("Persisted {} grid cells to {}", grid.len(), path.display());
    Ok(())
}

/// Loads a grid persisted by [`save_grid`].
///
/// # Errors
///
/// Returns a [`StoreError`] if the file cannot be read or parsed, if a
/// feature is missing its `cell_id` or geometry, or if the identifiers
/// are not unique and contiguous from 0.
pub fn load_grid(path: &Path) -> Result<HexGrid, StoreError> {
    let contents = std::fs::read_to_string(path)?;
    let geojson: GeoJson = contents.parse()?;

    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(StoreError::Schema {
            message: format!("{} is not a GeoJSON FeatureCollection", path.display()),
        });
    };

    let mut cells = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let cell_id = feature
            .properties
            .as_ref()
            .and_then(|properties| properties.get("cell_id"))
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| StoreError::Schema {
                message: "feature is missing an integer cell_id property".to_string(),
            })?;
        let cell_id = u32::try_from(cell_id).map_err(|_| StoreError::Schema {
            message: format!("cell_id {cell_id} does not fit in 32 bits"),
        })?;

        let geometry = feature.geometry.ok_or_else(|| StoreError::Schema {
            message: format!("cell {cell_id} has no geometry"),
        })?;
        let geometry = to_multipolygon(geometry).ok_or_else(|| StoreError::Schema {
            message: format!("cell {cell_id} geometry is not a (multi)polygon"),
        })?;

        cells.push(GridCell { cell_id, geometry });
    }

    // Sort by the explicit identifier; file row order is meaningless.
    cells.sort_by_key(|cell| cell.cell_id);
    let grid = HexGrid::from_cells(cells)?;
    log::info!("Loaded {} grid cells from {}", grid.len(), path.display());
    Ok(grid)
}

/// Converts a GeoJSON geometry into a [`MultiPolygon`].
/// Handles both `Polygon` and `MultiPolygon` geometry types.
fn to_multipolygon(geometry: geojson::Geometry) -> Option<MultiPolygon<f64>> {
    let geometry: geo::Geometry<f64> = geometry.try_into().ok()?;
    match geometry {
        geo::Geometry::MultiPolygon(multi_polygon) => Some(multi_polygon),
        geo::Geometry::Polygon(polygon) => Some(MultiPolygon::new(vec![polygon])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use geo::polygon;

    use super::*;

    fn sample_grid() -> HexGrid {
        let first = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
        ]]);
        let second = MultiPolygon::new(vec![polygon![
            (x: 1.0, y: 0.0),
            (x: 2.0, y: 0.0),
            (x: 2.0, y: 1.0),
            (x: 1.0, y: 1.0),
        ]]);
        HexGrid::from_geometries(vec![first, second])
    }

    #[test]
    fn grid_round_trip_preserves_id_to_geometry_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.geojson");

        let grid = sample_grid();
        save_grid(&grid, &path).unwrap();
        let loaded = load_grid(&path).unwrap();

        assert_eq!(loaded, grid);
    }

    #[test]
    fn load_rejects_gapped_cell_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.geojson");

        let gapped = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"cell_id":0},"geometry":
                {"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
            {"type":"Feature","properties":{"cell_id":2},"geometry":
                {"type":"Polygon","coordinates":[[[1,0],[2,0],[2,1],[1,1],[1,0]]]}}
        ]}"#;
        std::fs::write(&path, gapped).unwrap();

        assert!(matches!(
            load_grid(&path),
            Err(StoreError::GridIntegrity(_))
        ));
    }

    #[test]
    fn load_rejects_missing_cell_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.geojson");

        let missing = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{},"geometry":
                {"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}}
        ]}"#;
        std::fs::write(&path, missing).unwrap();

        assert!(matches!(load_grid(&path), Err(StoreError::Schema { .. })));
    }

    #[test]
    fn load_sorts_by_cell_id_not_row_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.geojson");

        // Rows deliberately out of order.
        let shuffled = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"cell_id":1},"geometry":
                {"type":"Polygon","coordinates":[[[1,0],[2,0],[2,1],[1,1],[1,0]]]}},
            {"type":"Feature","properties":{"cell_id":0},"geometry":
                {"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}}
        ]}"#;
        std::fs::write(&path, shuffled).unwrap();

        let loaded = load_grid(&path).unwrap();
        let ids: Vec<u32> = loaded.cells().iter().map(|cell| cell.cell_id).collect();
        assert_eq!(ids, vec![0, 1]);
    }
}
