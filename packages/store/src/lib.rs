#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Persisted artifacts for the analysis pipeline.
//!
//! The grid store is a GeoJSON `FeatureCollection` carrying an explicit
//! `cell_id` property per cell; the feature and temporal tables are CSV.
//! Loading never trusts file row order: the grid loader sorts by
//! `cell_id` and re-validates uniqueness and contiguity, so a
//! serialization round-trip can never silently reassign identifiers.

use std::path::{Path, PathBuf};

use hotspot_models::{FeatureTable, GridIntegrityError, TemporalRecord};
use thiserror::Error;

mod grid;
mod tables;

pub use grid::{load_grid, save_grid};
pub use tables::{
    load_feature_table, load_temporal_table, save_feature_table, save_temporal_table,
};

/// Errors that can occur while persisting or loading artifacts.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// GeoJSON parsing or conversion failed.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Persisted cell identifiers violate the uniqueness/contiguity
    /// contract.
    #[error("grid integrity violation: {0}")]
    GridIntegrity(#[from] GridIntegrityError),

    /// The file does not match the expected schema.
    #[error("schema error: {message}")]
    Schema {
        /// Description of what went wrong.
        message: String,
    },
}

/// Persists the aggregation outputs with all-or-nothing semantics.
///
/// Both tables are staged to `<path>.tmp` files first; only after both
/// writes succeed does the commit begin. During the commit any existing
/// output is set aside to `<path>.bak` before the staged file replaces
/// it, and on failure the set-aside outputs are restored, so a failed
/// run never destroys the artifacts of an earlier successful one.
///
/// # Errors
///
/// Returns a [`StoreError`] if writing or renaming either table fails.
pub fn save_tables(
    features: &FeatureTable,
    temporal: &[TemporalRecord],
    features_path: &Path,
    temporal_path: &Path,
) -> Result<(), StoreError> {
    let features_tmp = staged_path(features_path);
    let temporal_tmp = staged_path(temporal_path);

    let staged = save_feature_table(features, &features_tmp)
        .and_then(|()| save_temporal_table(temporal, &temporal_tmp));
    if let Err(error) = staged {
        discard(&features_tmp);
        discard(&temporal_tmp);
        return Err(error);
    }

    let features_backup = match set_aside(features_path) {
        Ok(backup) => backup,
        Err(error) => {
            discard(&features_tmp);
            discard(&temporal_tmp);
            return Err(error);
        }
    };
    if let Err(error) = std::fs::rename(&features_tmp, features_path) {
        restore(features_backup.as_deref(), features_path);
        discard(&features_tmp);
        discard(&temporal_tmp);
        return Err(error.into());
    }

    let temporal_backup = match set_aside(temporal_path) {
        Ok(backup) => backup,
        Err(error) => {
            restore(features_backup.as_deref(), features_path);
            discard(&temporal_tmp);
            return Err(error);
        }
    };
    if let Err(error) = std::fs::rename(&temporal_tmp, temporal_path) {
        restore(temporal_backup.as_deref(), temporal_path);
        restore(features_backup.as_deref(), features_path);
        discard(&temporal_tmp);
        return Err(error.into());
    }

    if let Some(backup) = features_backup {
        discard(&backup);
    }
    if let Some(backup) = temporal_backup {
        discard(&backup);
    }

    log::info!(
        "Persisted feature table to {} and temporal table to {}",
        features_path.display(),
        temporal_path.display()
    );
    Ok(())
}

fn staged_path(path: &Path) -> PathBuf {
    suffixed_path(path, ".tmp")
}

fn backup_path(path: &Path) -> PathBuf {
    suffixed_path(path, ".bak")
}

fn suffixed_path(path: &Path, suffix: &str) -> PathBuf {
    let mut suffixed = path.as_os_str().to_owned();
    suffixed.push(suffix);
    PathBuf::from(suffixed)
}

/// Moves any existing output to its `.bak` path so a failed commit can
/// put it back. Returns the backup path when one was made.
fn set_aside(path: &Path) -> Result<Option<PathBuf>, StoreError> {
    let backup = backup_path(path);
    match std::fs::rename(path, &backup) {
        Ok(()) => Ok(Some(backup)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

/// Undoes a commit step: puts the set-aside output back, or removes the
/// newly placed file when there was nothing to set aside.
fn restore(backup: Option<&Path>, path: &Path) {
    match backup {
        Some(backup) => {
            if let Err(error) = std::fs::rename(backup, path) {
                log::warn!("Failed to restore {}: {error}", path.display());
            }
        }
        None => discard(path),
    }
}

fn discard(path: &Path) {
    if let Err(error) = std::fs::remove_file(path) {
        if error.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to clean up {}: {error}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use hotspot_models::{FeatureRow, FeatureTable};

    use super::*;

    #[test]
    fn save_tables_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let features_path = dir.path().join("features.csv");
        let temporal_path = dir.path().join("temporal.csv");

        let table = FeatureTable::new(vec![FeatureRow::new(0)]);
        save_tables(&table, &[], &features_path, &temporal_path).unwrap();

        assert!(features_path.exists());
        assert!(temporal_path.exists());
    }

    #[test]
    fn failed_commit_restores_previous_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let features_path = dir.path().join("features.csv");
        let temporal_path = dir.path().join("temporal.csv");

        // An earlier successful run.
        let previous = FeatureTable::new(vec![FeatureRow::new(0)]);
        save_tables(&previous, &[], &features_path, &temporal_path).unwrap();
        let previous_contents = std::fs::read_to_string(&features_path).unwrap();

        // Block the temporal backup slot with a directory so the commit
        // cannot set the old temporal table aside.
        std::fs::create_dir(backup_path(&temporal_path)).unwrap();

        let next = FeatureTable::new(vec![FeatureRow::new(0), FeatureRow::new(1)]);
        let result = save_tables(&next, &[], &features_path, &temporal_path);

        assert!(result.is_err());
        // Both prior outputs survive the failed run.
        assert_eq!(
            std::fs::read_to_string(&features_path).unwrap(),
            previous_contents
        );
        assert!(temporal_path.is_file());
        assert!(!staged_path(&features_path).exists());
        assert!(!staged_path(&temporal_path).exists());
    }

    #[test]
    fn save_tables_persists_nothing_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let features_path = dir.path().join("features.csv");
        // Unwritable target: the parent directory does not exist.
        let temporal_path = dir.path().join("missing").join("temporal.csv");

        let table = FeatureTable::new(vec![FeatureRow::new(0)]);
        let result = save_tables(&table, &[], &features_path, &temporal_path);

        assert!(result.is_err());
        assert!(!features_path.exists());
        assert!(!staged_path(&features_path).exists());
    }
}
