#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared grid, event, and table types for the hotspot analysis core.
//!
//! Defines the records passed between the tessellation, aggregation, and
//! estimation stages. Every cross-stage join keys on the explicit
//! [`GridCell::cell_id`] field; positional row order is never meaningful
//! once a table has left the stage that built it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

pub mod columns;

/// A single grid cell with its stable identifier.
///
/// `cell_id` is assigned exactly once when the grid is built, contiguous
/// from 0 in generation order. It is persisted alongside the geometry and
/// re-validated on load; it is never recomputed from storage row position.
#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    /// Stable identifier, unique and contiguous across the grid.
    pub cell_id: u32,
    /// Clipped cell geometry in projected units. Clipping a hexagon
    /// against the boundary union can split it into multiple parts, so
    /// the geometry is a [`MultiPolygon`].
    pub geometry: MultiPolygon<f64>,
}

/// An ordered hexagonal grid with validated cell identifiers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HexGrid {
    cells: Vec<GridCell>,
}

impl HexGrid {
    /// Builds a grid from bare geometries, assigning contiguous `cell_id`
    /// values in the order given.
    ///
    /// This is the only place identifiers are created; everything else
    /// carries them through joins unchanged.
    #[must_use]
    pub fn from_geometries(geometries: Vec<MultiPolygon<f64>>) -> Self {
        let mut next_id: u32 = 0;
        let cells = geometries
            .into_iter()
            .map(|geometry| {
                let cell = GridCell {
                    cell_id: next_id,
                    geometry,
                };
                next_id += 1;
                cell
            })
            .collect();
        Self { cells }
    }

    /// Reassembles a grid from previously persisted cells.
    ///
    /// Cells must already be sorted by `cell_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`GridIntegrityError`] if the identifiers are not unique
    /// and contiguous starting at 0.
    pub fn from_cells(cells: Vec<GridCell>) -> Result<Self, GridIntegrityError> {
        for (position, cell) in cells.iter().enumerate() {
            let expected = u32::try_from(position).map_err(|_| GridIntegrityError {
                position,
                cell_id: cell.cell_id,
            })?;
            if cell.cell_id != expected {
                return Err(GridIntegrityError {
                    position,
                    cell_id: cell.cell_id,
                });
            }
        }
        Ok(Self { cells })
    }

    /// The cells in `cell_id` order.
    #[must_use]
    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    /// Number of cells in the grid.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the grid has no cells. A degenerate boundary yields an
    /// empty grid rather than an error, so downstream stages tolerate
    /// this.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Error returned when persisted cells violate the `cell_id` contract
/// (unique, contiguous, ascending from 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridIntegrityError {
    /// Row position at which the violation was detected.
    pub position: usize,
    /// The offending identifier.
    pub cell_id: u32,
}

impl std::fmt::Display for GridIntegrityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cell at position {} has cell_id {}: expected contiguous ids starting at 0",
            self.position, self.cell_id
        )
    }
}

impl std::error::Error for GridIntegrityError {}

/// A point event in projected coordinates.
///
/// Coordinates are validated by the upstream providers; this core assumes
/// they are well-formed. Category and timestamp are optional because
/// contextual datasets (infrastructure features) typically carry neither.
#[derive(Debug, Clone, PartialEq)]
pub struct PointEvent {
    /// Projected x coordinate (linear units).
    pub x: f64,
    /// Projected y coordinate (linear units).
    pub y: f64,
    /// Event category, e.g. an offense type. `None` for contextual points.
    pub category: Option<String>,
    /// Event timestamp. `None` for undated points.
    pub timestamp: Option<DateTime<Utc>>,
}

impl PointEvent {
    /// A bare point with no category or timestamp.
    #[must_use]
    pub const fn at(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            category: None,
            timestamp: None,
        }
    }

    /// Attaches a category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Attaches a timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Per-cell regression coefficients produced by the estimation stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Coefficients {
    /// Local intercept.
    pub intercept: f64,
    /// Slope per predictor column, keyed by column name.
    pub slopes: BTreeMap<String, f64>,
}

/// One feature-table row: the aggregated counts for a single cell, later
/// augmented with a prediction and optional coefficients.
///
/// All count columns are zero-filled during aggregation; a cell with no
/// matching events has count 0, never a missing value.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    /// The cell this row describes.
    pub cell_id: u32,
    /// Count of events whose category was in the active set.
    pub total_count: u64,
    /// One count per contextual dataset, keyed by column name
    /// (see [`columns::context`]).
    pub context_counts: BTreeMap<String, u64>,
    /// One count per active category, keyed by column name
    /// (see [`columns::category`]).
    pub category_counts: BTreeMap<String, u64>,
    /// Predicted response from the estimation stage. `None` until a
    /// surface fit has been applied, or when the cell was excluded from
    /// fitting.
    pub prediction: Option<f64>,
    /// Local regression coefficients, present only for strategies that
    /// produce them.
    pub coefficients: Option<Coefficients>,
}

impl FeatureRow {
    /// An empty row for a cell, with all counts at zero.
    #[must_use]
    pub const fn new(cell_id: u32) -> Self {
        Self {
            cell_id,
            total_count: 0,
            context_counts: BTreeMap::new(),
            category_counts: BTreeMap::new(),
            prediction: None,
            coefficients: None,
        }
    }
}

/// The wide per-cell feature table. One row per `cell_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    /// Wraps rows into a table. Row order is preserved but carries no
    /// meaning; consumers join on `cell_id`.
    #[must_use]
    pub const fn new(rows: Vec<FeatureRow>) -> Self {
        Self { rows }
    }

    /// The rows of the table.
    #[must_use]
    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    /// Mutable access for merge operations (applying a surface fit).
    pub fn rows_mut(&mut self) -> &mut [FeatureRow] {
        &mut self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Union of contextual column names across all rows.
    #[must_use]
    pub fn context_columns(&self) -> BTreeSet<String> {
        self.rows
            .iter()
            .flat_map(|row| row.context_counts.keys().cloned())
            .collect()
    }

    /// Union of category column names across all rows.
    #[must_use]
    pub fn category_columns(&self) -> BTreeSet<String> {
        self.rows
            .iter()
            .flat_map(|row| row.category_counts.keys().cloned())
            .collect()
    }

    /// Union of slope coefficient names across all rows.
    #[must_use]
    pub fn slope_columns(&self) -> BTreeSet<String> {
        self.rows
            .iter()
            .filter_map(|row| row.coefficients.as_ref())
            .flat_map(|coefficients| coefficients.slopes.keys().cloned())
            .collect()
    }

    /// Whether any row carries a prediction.
    #[must_use]
    pub fn has_predictions(&self) -> bool {
        self.rows.iter().any(|row| row.prediction.is_some())
    }

    /// Whether any row carries coefficients.
    #[must_use]
    pub fn has_coefficients(&self) -> bool {
        self.rows.iter().any(|row| row.coefficients.is_some())
    }

    /// Extracts a numeric column by name, one value per row in row order.
    ///
    /// Count columns always yield `Some` (they are zero-filled); the
    /// prediction column yields `None` for rows without a prediction.
    /// Returns `None` if no column with this name exists.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        match name {
            columns::TOTAL_COUNT => Some(
                self.rows
                    .iter()
                    .map(|row| Some(row.total_count as f64))
                    .collect(),
            ),
            columns::PREDICTION => Some(self.rows.iter().map(|row| row.prediction).collect()),
            _ => {
                let known = self.rows.iter().any(|row| {
                    row.context_counts.contains_key(name)
                        || row.category_counts.contains_key(name)
                });
                known.then(|| {
                    self.rows
                        .iter()
                        .map(|row| {
                            let count = row
                                .context_counts
                                .get(name)
                                .or_else(|| row.category_counts.get(name))
                                .copied()
                                .unwrap_or(0);
                            Some(count as f64)
                        })
                        .collect()
                })
            }
        }
    }
}

/// One long-format temporal record: the count of events observed for a
/// distinct `(cell, month, hour, weekday, category)` combination.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemporalRecord {
    /// The cell the events fell inside.
    pub cell_id: u32,
    /// Calendar month, formatted `YYYY-MM`.
    pub month: String,
    /// Hour of day, 0-23.
    pub hour: u8,
    /// Day of week, 0-6 with 0 = Monday.
    pub weekday: u8,
    /// Event category.
    pub category: String,
    /// Number of events in this bucket.
    pub count: u64,
}
