#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatially-varying regression surface over the aggregated feature table.
//!
//! Two mutually exclusive strategies sit behind one estimator: the exact
//! geographically weighted regression, provided by an optional
//! [`GwrBackend`] capability resolved at startup, and the k-nearest-
//! neighbor local OLS fallback that trades kernel-weighted smoothness for
//! independent per-cell fits. The strategy is always chosen explicitly by
//! the caller; a failed strategy is never substituted with the other.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use geo::Centroid;
use hotspot_models::{Coefficients, FeatureTable, HexGrid};
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

mod local;

/// Errors that can occur during surface estimation.
#[derive(Debug, Error)]
pub enum EstimateError {
    /// No predictor columns were configured.
    #[error("no usable predictor columns configured")]
    NoPredictors,

    /// A configured column does not exist in the feature table.
    #[error("unknown feature column: {name}")]
    UnknownColumn {
        /// The missing column name.
        name: String,
    },

    /// The neighbor count must be at least 1.
    #[error("neighbor count must be at least 1")]
    InvalidNeighborCount,

    /// The exact GWR strategy was requested but no backend is registered.
    #[error("exact GWR capability is not available in this deployment")]
    ExactGwrUnavailable,

    /// The response column has no usable values in any row.
    #[error("response column {name} has no usable values")]
    ResponseAllMissing {
        /// The response column name.
        name: String,
    },

    /// A feature row references a cell that is not in the grid.
    #[error("feature row references cell_id {cell_id} absent from the grid")]
    UnknownCell {
        /// The unresolvable identifier.
        cell_id: u32,
    },

    /// The estimate was cancelled cooperatively.
    #[error("estimation cancelled")]
    Cancelled,

    /// A least-squares solve failed.
    #[error("least-squares solve failed: {message}")]
    Solve {
        /// Description of what went wrong.
        message: String,
    },

    /// The exact backend returned a fit that does not line up with the
    /// fitted cells.
    #[error("exact backend returned {found} fits for {expected} cells")]
    InvalidBackendFit {
        /// Number of fitted cells handed to the backend.
        expected: usize,
        /// Number of fits the backend returned.
        found: usize,
    },
}

/// Grid-size threshold below which the exact method is usually
/// affordable. A recommendation only; the caller decides.
pub const EXACT_GWR_CELL_LIMIT: usize = 6000;

/// The two estimation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Exact geographically weighted regression via the registered
    /// [`GwrBackend`]. Fails with
    /// [`EstimateError::ExactGwrUnavailable`] when no backend is
    /// registered.
    ExactGwr,
    /// Unweighted OLS over each cell's k nearest neighbors. A documented
    /// approximation to, not an equivalent of, the exact method: no
    /// distance weighting is applied within the neighbor set.
    LocalLinear,
}

/// Suggests a strategy for a grid of `cell_count` cells.
///
/// This encodes the reference threshold only; callers remain responsible
/// for the choice and the estimator never overrides it.
#[must_use]
pub const fn recommended_strategy(cell_count: usize) -> Strategy {
    if cell_count < EXACT_GWR_CELL_LIMIT {
        Strategy::ExactGwr
    } else {
        Strategy::LocalLinear
    }
}

/// Configuration for a surface estimate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimateConfig {
    /// Response column name, e.g. `total_count`.
    pub response: String,
    /// Predictor column names. Must be non-empty.
    pub predictors: Vec<String>,
    /// Neighbor count for the fallback strategy. Clamped to the number
    /// of fitted cells; must be at least 1.
    pub neighbors: usize,
}

impl EstimateConfig {
    /// Default neighbor count for the fallback strategy.
    pub const DEFAULT_NEIGHBORS: usize = 60;

    /// Creates a configuration with the default neighbor count.
    #[must_use]
    pub fn new(response: impl Into<String>, predictors: Vec<String>) -> Self {
        Self {
            response: response.into(),
            predictors,
            neighbors: Self::DEFAULT_NEIGHBORS,
        }
    }

    /// Overrides the neighbor count.
    #[must_use]
    pub const fn with_neighbors(mut self, neighbors: usize) -> Self {
        self.neighbors = neighbors;
        self
    }
}

/// Cooperative cancellation flag, checked between per-cell fits to bound
/// worst-case latency on large grids.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// A fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Input handed to an exact GWR backend: one entry per fitted cell, in a
/// consistent row order across all fields.
#[derive(Debug)]
pub struct GwrRequest<'a> {
    /// Cell centroid coordinates.
    pub coords: &'a [[f64; 2]],
    /// Predictor matrix, one row per cell, without an intercept column.
    pub predictors: &'a DMatrix<f64>,
    /// Response vector.
    pub response: &'a DVector<f64>,
    /// Predictor column names, in matrix column order.
    pub predictor_names: &'a [String],
}

/// Per-cell output of an exact GWR backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GwrFit {
    /// Local intercept per cell.
    pub intercepts: Vec<f64>,
    /// Local slope per predictor per cell (row-major).
    pub slopes: Vec<Vec<f64>>,
    /// Fitted response per cell.
    pub fitted: Vec<f64>,
}

/// Exact geographically weighted regression capability.
///
/// A backend performs kernel-weighted least squares with an automatically
/// selected bandwidth. None is bundled with this workspace; deployments
/// that provide one register it once at startup via
/// [`SurfaceEstimator::with_exact_backend`].
pub trait GwrBackend: Send + Sync {
    /// Fits the model over the request's cells.
    ///
    /// # Errors
    ///
    /// Returns an [`EstimateError`] if the backend cannot produce a fit.
    fn fit(&self, request: &GwrRequest<'_>) -> Result<GwrFit, EstimateError>;
}

/// A fitted surface keyed by `cell_id`, ready to merge onto the feature
/// table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurfaceFit {
    predictions: BTreeMap<u32, f64>,
    coefficients: BTreeMap<u32, Coefficients>,
}

impl SurfaceFit {
    pub(crate) fn from_predictions(predictions: Vec<(u32, f64)>) -> Self {
        Self {
            predictions: predictions.into_iter().collect(),
            coefficients: BTreeMap::new(),
        }
    }

    /// The predicted response for a cell, if it was fitted.
    #[must_use]
    pub fn prediction(&self, cell_id: u32) -> Option<f64> {
        self.predictions.get(&cell_id).copied()
    }

    /// The local coefficients for a cell, when the strategy produced
    /// them.
    #[must_use]
    pub fn coefficients(&self, cell_id: u32) -> Option<&Coefficients> {
        self.coefficients.get(&cell_id)
    }

    /// Number of fitted cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    /// Whether no cell was fitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    /// Merges the fit onto the feature table by `cell_id`.
    ///
    /// Rows that were excluded from fitting receive `prediction = None`;
    /// coefficient columns are attached only where the fit produced them.
    pub fn apply(&self, table: &mut FeatureTable) {
        for row in table.rows_mut() {
            row.prediction = self.predictions.get(&row.cell_id).copied();
            if let Some(coefficients) = self.coefficients.get(&row.cell_id) {
                row.coefficients = Some(coefficients.clone());
            }
        }
    }
}

/// The local surface estimator.
///
/// Holds the optional exact capability; the fallback needs no external
/// capability and is always available.
#[derive(Default)]
pub struct SurfaceEstimator {
    exact_backend: Option<Box<dyn GwrBackend>>,
}

impl SurfaceEstimator {
    /// An estimator without the exact capability.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An estimator with an exact GWR backend registered.
    #[must_use]
    pub fn with_exact_backend(backend: Box<dyn GwrBackend>) -> Self {
        Self {
            exact_backend: Some(backend),
        }
    }

    /// Whether the exact capability is available.
    #[must_use]
    pub fn has_exact_backend(&self) -> bool {
        self.exact_backend.is_some()
    }

    /// Produces a per-cell predicted surface for the configured response.
    ///
    /// Rows whose response (or any predictor) value is missing are
    /// excluded from fitting; they keep an undefined prediction after
    /// [`SurfaceFit::apply`].
    ///
    /// # Errors
    ///
    /// Returns an [`EstimateError`] if the configuration is unusable, the
    /// requested strategy is unavailable, the response is missing in
    /// every row, a row references a cell absent from the grid, or the
    /// estimate is cancelled.
    pub fn estimate(
        &self,
        grid: &HexGrid,
        table: &FeatureTable,
        config: &EstimateConfig,
        strategy: Strategy,
        cancel: &CancelToken,
    ) -> Result<SurfaceFit, EstimateError> {
        match strategy {
            Strategy::LocalLinear => {
                if config.neighbors == 0 {
                    return Err(EstimateError::InvalidNeighborCount);
                }
                let input = extract_input(grid, table, config)?;
                local::fit_local_linear(&input, config.neighbors, cancel)
            }
            Strategy::ExactGwr => {
                let backend = self
                    .exact_backend
                    .as_deref()
                    .ok_or(EstimateError::ExactGwrUnavailable)?;
                let input = extract_input(grid, table, config)?;
                let request = GwrRequest {
                    coords: &input.coords,
                    predictors: &input.predictors,
                    response: &input.response,
                    predictor_names: &config.predictors,
                };
                log::info!("Fitting exact GWR surface over {} cells", input.len());
                let fit = backend.fit(&request)?;
                merge_exact_fit(&input, &config.predictors, fit)
            }
        }
    }
}

/// The fitted subset of the feature table: rows with a usable response
/// and complete predictors, joined to their cell centroids.
pub(crate) struct ModelInput {
    pub(crate) cell_ids: Vec<u32>,
    pub(crate) coords: Vec<[f64; 2]>,
    pub(crate) predictors: DMatrix<f64>,
    pub(crate) response: DVector<f64>,
}

impl ModelInput {
    pub(crate) fn len(&self) -> usize {
        self.cell_ids.len()
    }
}

fn extract_input(
    grid: &HexGrid,
    table: &FeatureTable,
    config: &EstimateConfig,
) -> Result<ModelInput, EstimateError> {
    if config.predictors.is_empty() {
        return Err(EstimateError::NoPredictors);
    }

    let response_column =
        table
            .column(&config.response)
            .ok_or_else(|| EstimateError::UnknownColumn {
                name: config.response.clone(),
            })?;
    let predictor_columns: Vec<Vec<Option<f64>>> = config
        .predictors
        .iter()
        .map(|name| {
            table
                .column(name)
                .ok_or_else(|| EstimateError::UnknownColumn { name: name.clone() })
        })
        .collect::<Result<_, _>>()?;

    let centroids: BTreeMap<u32, [f64; 2]> = grid
        .cells()
        .iter()
        .filter_map(|cell| {
            cell.geometry
                .centroid()
                .map(|point| (cell.cell_id, [point.x(), point.y()]))
        })
        .collect();

    let mut cell_ids = Vec::new();
    let mut coords = Vec::new();
    let mut flat_predictors = Vec::new();
    let mut response = Vec::new();

    for (index, row) in table.rows().iter().enumerate() {
        let Some(response_value) = response_column[index] else {
            continue;
        };
        let values: Option<Vec<f64>> = predictor_columns
            .iter()
            .map(|column| column[index])
            .collect();
        let Some(values) = values else {
            continue;
        };
        let coord = centroids
            .get(&row.cell_id)
            .ok_or(EstimateError::UnknownCell {
                cell_id: row.cell_id,
            })?;

        cell_ids.push(row.cell_id);
        coords.push(*coord);
        flat_predictors.extend(values);
        response.push(response_value);
    }

    if cell_ids.is_empty() {
        return Err(EstimateError::ResponseAllMissing {
            name: config.response.clone(),
        });
    }

    let rows = cell_ids.len();
    Ok(ModelInput {
        cell_ids,
        coords,
        predictors: DMatrix::from_row_slice(rows, config.predictors.len(), &flat_predictors),
        response: DVector::from_vec(response),
    })
}

fn merge_exact_fit(
    input: &ModelInput,
    predictor_names: &[String],
    fit: GwrFit,
) -> Result<SurfaceFit, EstimateError> {
    let expected = input.len();
    if fit.fitted.len() != expected
        || fit.intercepts.len() != expected
        || fit.slopes.len() != expected
    {
        return Err(EstimateError::InvalidBackendFit {
            expected,
            found: fit.fitted.len(),
        });
    }

    let mut predictions = BTreeMap::new();
    let mut coefficients = BTreeMap::new();
    for (index, &cell_id) in input.cell_ids.iter().enumerate() {
        predictions.insert(cell_id, fit.fitted[index]);
        coefficients.insert(
            cell_id,
            Coefficients {
                intercept: fit.intercepts[index],
                slopes: predictor_names
                    .iter()
                    .cloned()
                    .zip(fit.slopes[index].iter().copied())
                    .collect(),
            },
        );
    }

    Ok(SurfaceFit {
        predictions,
        coefficients,
    })
}
