#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Point-in-polygon aggregation of event datasets onto the hex grid.
//!
//! Joins point events against the grid under a strict "inside" predicate,
//! producing the wide per-cell feature table (total, per-context, and
//! per-category counts, zero-filled over the full `cell_id` domain) and
//! the long-format temporal table. Both tables are rebuilt whole on every
//! run; nothing is updated incrementally.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{Datelike, Timelike};
use hotspot_models::{FeatureRow, FeatureTable, HexGrid, PointEvent, TemporalRecord, columns};
use hotspot_store::StoreError;

pub mod index;

pub use index::CellIndex;

/// A named contextual point dataset (e.g. streetlights, bus stops),
/// counted per cell independently of category filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextLayer {
    /// Layer name; the feature column becomes `<name>_count`.
    pub name: String,
    /// The layer's points, in projected coordinates.
    pub points: Vec<PointEvent>,
}

impl ContextLayer {
    /// Creates a named layer.
    #[must_use]
    pub fn new(name: impl Into<String>, points: Vec<PointEvent>) -> Self {
        Self {
            name: name.into(),
            points,
        }
    }
}

/// The output of one aggregation run.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    /// Wide per-cell feature table, one row per `cell_id`.
    pub features: FeatureTable,
    /// Long-format temporal table, sorted by
    /// `(cell_id, month, hour, weekday, category)`.
    pub temporal: Vec<TemporalRecord>,
}

/// Counts how many points fall strictly inside each grid cell.
///
/// The result is sparse: cells with no matching points are absent, and
/// unmatched points are dropped silently (a point outside every cell is
/// not an error). Callers must reindex against the full `cell_id` domain
/// and fill absent entries with 0.
#[must_use]
pub fn count_points(points: &[PointEvent], index: &CellIndex) -> BTreeMap<u32, u64> {
    let mut counts = BTreeMap::new();
    for point in points {
        if let Some(cell_id) = index.locate(point.x, point.y) {
            *counts.entry(cell_id).or_insert(0) += 1;
        }
    }
    counts
}

/// Aggregates event datasets onto the grid.
///
/// - `total_count` counts events whose category is in `active_categories`.
/// - Each [`ContextLayer`] contributes one count column, independent of
///   category filtering.
/// - Each active category contributes one count column over events of
///   that category only.
/// - The temporal table buckets every event that matched a cell and
///   carries both a category and a timestamp; unmatched or undated events
///   are excluded, not errored.
///
/// Duplicate co-located points count independently. Every `cell_id` in
/// the grid appears exactly once in the feature table with all counts
/// zero-filled.
#[must_use]
pub fn aggregate(
    grid: &HexGrid,
    events: &[PointEvent],
    context_layers: &[ContextLayer],
    active_categories: &[String],
) -> Aggregation {
    let index = CellIndex::build(grid);
    let active: BTreeSet<&str> = active_categories.iter().map(String::as_str).collect();

    let mut totals: BTreeMap<u32, u64> = BTreeMap::new();
    let mut per_category: BTreeMap<String, BTreeMap<u32, u64>> = active_categories
        .iter()
        .map(|category| (columns::category(category), BTreeMap::new()))
        .collect();
    let mut temporal_counts: BTreeMap<(u32, String, u8, u8, String), u64> = BTreeMap::new();
    let mut unmatched = 0_usize;

    for event in events {
        let Some(cell_id) = index.locate(event.x, event.y) else {
            unmatched += 1;
            continue;
        };
        let Some(category) = event.category.as_deref() else {
            continue;
        };

        if active.contains(category) {
            *totals.entry(cell_id).or_insert(0) += 1;
            if let Some(counts) = per_category.get_mut(&columns::category(category)) {
                *counts.entry(cell_id).or_insert(0) += 1;
            }
        }

        // The temporal table covers all categories, not just active ones.
        if let Some(timestamp) = event.timestamp {
            let key = (
                cell_id,
                format!("{:04}-{:02}", timestamp.year(), timestamp.month()),
                hour_of_day(&timestamp),
                weekday_from_monday(&timestamp),
                category.to_string(),
            );
            *temporal_counts.entry(key).or_insert(0) += 1;
        }
    }

    if unmatched > 0 {
        log::debug!("{unmatched} events fell outside every cell");
    }

    let context_counts: Vec<(String, BTreeMap<u32, u64>)> = context_layers
        .iter()
        .map(|layer| {
            (
                columns::context(&layer.name),
                count_points(&layer.points, &index),
            )
        })
        .collect();

    // Reindex every sparse count over the full cell_id domain, zero
    // filled, in grid order.
    let rows: Vec<FeatureRow> = grid
        .cells()
        .iter()
        .map(|cell| {
            let mut row = FeatureRow::new(cell.cell_id);
            row.total_count = totals.get(&cell.cell_id).copied().unwrap_or(0);
            for (name, counts) in &context_counts {
                row.context_counts
                    .insert(name.clone(), counts.get(&cell.cell_id).copied().unwrap_or(0));
            }
            for (name, counts) in &per_category {
                row.category_counts
                    .insert(name.clone(), counts.get(&cell.cell_id).copied().unwrap_or(0));
            }
            row
        })
        .collect();

    let temporal: Vec<TemporalRecord> = temporal_counts
        .into_iter()
        .map(
            |((cell_id, month, hour, weekday, category), count)| TemporalRecord {
                cell_id,
                month,
                hour,
                weekday,
                category,
                count,
            },
        )
        .collect();

    log::info!(
        "Aggregated {} events over {} cells: {} feature rows, {} temporal records",
        events.len(),
        grid.len(),
        rows.len(),
        temporal.len()
    );

    Aggregation {
        features: FeatureTable::new(rows),
        temporal,
    }
}

/// Runs [`aggregate`] and persists both output tables.
///
/// Persistence is all-or-nothing: either both the feature table and the
/// temporal table are written, or neither is.
///
/// # Errors
///
/// Returns a [`StoreError`] if persisting either table fails; no partial
/// output is left behind.
pub fn aggregate_and_persist(
    grid: &HexGrid,
    events: &[PointEvent],
    context_layers: &[ContextLayer],
    active_categories: &[String],
    features_path: &Path,
    temporal_path: &Path,
) -> Result<Aggregation, StoreError> {
    let aggregation = aggregate(grid, events, context_layers, active_categories);
    hotspot_store::save_tables(
        &aggregation.features,
        &aggregation.temporal,
        features_path,
        temporal_path,
    )?;
    Ok(aggregation)
}

#[allow(clippy::cast_possible_truncation)]
fn hour_of_day(timestamp: &chrono::DateTime<chrono::Utc>) -> u8 {
    timestamp.hour() as u8
}

#[allow(clippy::cast_possible_truncation)]
fn weekday_from_monday(timestamp: &chrono::DateTime<chrono::Utc>) -> u8 {
    timestamp.weekday().num_days_from_monday() as u8
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Utc};
    use geo::{MultiPolygon, polygon};
    use hotspot_models::HexGrid;

    use super::*;

    /// Two unit squares sharing the edge x = 1.
    fn two_cell_grid() -> HexGrid {
        let left = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
        ]]);
        let right = MultiPolygon::new(vec![polygon![
            (x: 1.0, y: 0.0),
            (x: 2.0, y: 0.0),
            (x: 2.0, y: 1.0),
            (x: 1.0, y: 1.0),
        ]]);
        HexGrid::from_geometries(vec![left, right])
    }

    fn categories(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn counts_are_sparse_and_strict() {
        let grid = two_cell_grid();
        let index = CellIndex::build(&grid);
        let points = vec![
            PointEvent::at(0.5, 0.5),
            PointEvent::at(0.25, 0.25),
            PointEvent::at(5.0, 5.0), // outside every cell
        ];

        let counts = count_points(&points, &index);
        assert_eq!(counts.get(&0), Some(&2));
        assert_eq!(counts.get(&1), None);
    }

    #[test]
    fn edge_point_matches_neither_cell() {
        let grid = two_cell_grid();
        let events = vec![PointEvent::at(1.0, 0.5).with_category("BURGLARY")];

        let aggregation = aggregate(&grid, &events, &[], &categories(&["BURGLARY"]));
        for row in aggregation.features.rows() {
            assert_eq!(row.total_count, 0);
        }
        assert!(aggregation.temporal.is_empty());
    }

    #[test]
    fn duplicate_colocated_points_count_independently() {
        let grid = two_cell_grid();
        let events = vec![
            PointEvent::at(0.5, 0.5).with_category("BURGLARY"),
            PointEvent::at(0.5, 0.5).with_category("BURGLARY"),
        ];

        let aggregation = aggregate(&grid, &events, &[], &categories(&["BURGLARY"]));
        assert_eq!(aggregation.features.rows()[0].total_count, 2);
    }

    #[test]
    fn every_cell_appears_once_with_zero_fill() {
        let grid = two_cell_grid();
        let events = vec![PointEvent::at(1.5, 0.5).with_category("ROBBERY")];
        let layers = vec![ContextLayer::new("streetlight", vec![PointEvent::at(0.5, 0.5)])];

        let aggregation = aggregate(&grid, &events, &layers, &categories(&["ROBBERY"]));
        let rows = aggregation.features.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cell_id, 0);
        assert_eq!(rows[1].cell_id, 1);

        // Cell 0 had no matching events: counts are 0, never missing.
        assert_eq!(rows[0].total_count, 0);
        assert_eq!(rows[0].category_counts.get("category_robbery"), Some(&0));
        assert_eq!(rows[0].context_counts.get("streetlight_count"), Some(&1));

        assert_eq!(rows[1].total_count, 1);
        assert_eq!(rows[1].category_counts.get("category_robbery"), Some(&1));
        assert_eq!(rows[1].context_counts.get("streetlight_count"), Some(&0));
    }

    #[test]
    fn category_counts_sum_to_at_most_total() {
        let grid = two_cell_grid();
        // ASSAULT is observed but not active, so it contributes to
        // nothing; BURGLARY and ROBBERY are both active.
        let events = vec![
            PointEvent::at(0.5, 0.5).with_category("BURGLARY"),
            PointEvent::at(0.5, 0.6).with_category("ROBBERY"),
            PointEvent::at(0.5, 0.7).with_category("ASSAULT"),
        ];

        let aggregation = aggregate(&grid, &events, &[], &categories(&["BURGLARY", "ROBBERY"]));
        let row = &aggregation.features.rows()[0];
        let category_sum: u64 = row.category_counts.values().sum();
        assert_eq!(row.total_count, 2);
        assert!(category_sum <= row.total_count);
    }

    #[test]
    fn temporal_records_bucket_by_month_hour_weekday() {
        let grid = two_cell_grid();
        // 2025-03-15 is a Saturday (weekday 5 counting from Monday).
        let saturday = Utc.with_ymd_and_hms(2025, 3, 15, 14, 30, 0).unwrap();
        let events = vec![
            PointEvent::at(0.5, 0.5)
                .with_category("ASSAULT")
                .with_timestamp(saturday),
            PointEvent::at(0.6, 0.5)
                .with_category("ASSAULT")
                .with_timestamp(saturday),
            // Dated but outside every cell: excluded.
            PointEvent::at(9.0, 9.0)
                .with_category("ASSAULT")
                .with_timestamp(saturday),
            // Matched but undated: excluded from the temporal table.
            PointEvent::at(0.7, 0.5).with_category("ASSAULT"),
        ];

        let aggregation = aggregate(&grid, &events, &[], &categories(&["BURGLARY"]));
        assert_eq!(aggregation.temporal.len(), 1);
        let record = &aggregation.temporal[0];
        assert_eq!(record.cell_id, 0);
        assert_eq!(record.month, "2025-03");
        assert_eq!(record.hour, 14);
        assert_eq!(record.weekday, 5);
        assert_eq!(record.category, "ASSAULT");
        assert_eq!(record.count, 2);
    }

    #[test]
    fn temporal_covers_inactive_categories() {
        let grid = two_cell_grid();
        let timestamp = Utc.with_ymd_and_hms(2025, 1, 6, 8, 0, 0).unwrap();
        let events = vec![
            PointEvent::at(0.5, 0.5)
                .with_category("THEFT")
                .with_timestamp(timestamp),
        ];

        // THEFT is not active: it appears in the temporal table but not
        // in the wide counts.
        let aggregation = aggregate(&grid, &events, &[], &categories(&["BURGLARY"]));
        assert_eq!(aggregation.features.rows()[0].total_count, 0);
        assert_eq!(aggregation.temporal.len(), 1);
        assert_eq!(aggregation.temporal[0].category, "THEFT");
        // 2025-01-06 is a Monday.
        assert_eq!(aggregation.temporal[0].weekday, 0);
    }

    #[test]
    fn empty_grid_produces_empty_tables() {
        let grid = HexGrid::default();
        let events = vec![PointEvent::at(0.5, 0.5).with_category("BURGLARY")];

        let aggregation = aggregate(&grid, &events, &[], &categories(&["BURGLARY"]));
        assert!(aggregation.features.is_empty());
        assert!(aggregation.temporal.is_empty());
    }
}
