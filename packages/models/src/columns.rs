//! Canonical feature-table column names.
//!
//! The estimation stage addresses columns by these names, and the store
//! writes CSV headers with them, so they are defined once here.

/// Identifier column. Always first in the persisted table.
pub const CELL_ID: &str = "cell_id";

/// Total count of active-category events per cell.
pub const TOTAL_COUNT: &str = "total_count";

/// Predicted response from the estimation stage.
pub const PREDICTION: &str = "prediction";

/// Local regression intercept.
pub const COEF_INTERCEPT: &str = "coef_intercept";

/// Prefix for per-predictor slope columns.
pub const COEF_PREFIX: &str = "coef_";

/// Column name for a contextual dataset, e.g. `streetlight_count`.
#[must_use]
pub fn context(layer: &str) -> String {
    format!("{layer}_count")
}

/// Column name for an event category, e.g. `category_burglary`.
#[must_use]
pub fn category(category: &str) -> String {
    format!("category_{}", category.to_lowercase())
}

/// Column name for a slope coefficient, e.g. `coef_streetlight_count`.
#[must_use]
pub fn slope(predictor: &str) -> String {
    format!("{COEF_PREFIX}{predictor}")
}
