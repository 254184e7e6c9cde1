//! CSV feature and temporal tables.
//!
//! Feature table columns, in order: `cell_id`, `total_count`, contextual
//! count columns (sorted by name), category count columns (sorted by
//! name), then `prediction` and coefficient columns when any row carries
//! them. Absent predictions and coefficients are empty fields.

use std::path::Path;

use hotspot_models::{Coefficients, FeatureRow, FeatureTable, TemporalRecord, columns};

use crate::StoreError;

/// Writes the wide per-cell feature table.
///
/// # Errors
///
/// Returns a [`StoreError`] if the file cannot be written.
pub fn save_feature_table(table: &FeatureTable, path: &Path) -> Result<(), StoreError> {
    let context_columns: Vec<String> = table.context_columns().into_iter().collect();
    let category_columns: Vec<String> = table.category_columns().into_iter().collect();
    let slope_columns: Vec<String> = table.slope_columns().into_iter().collect();
    let with_predictions = table.has_predictions();
    let with_coefficients = table.has_coefficients();

    let mut header: Vec<String> = vec![
        columns::CELL_ID.to_string(),
        columns::TOTAL_COUNT.to_string(),
    ];
    header.extend(context_columns.iter().cloned());
    header.extend(category_columns.iter().cloned());
    if with_predictions {
        header.push(columns::PREDICTION.to_string());
    }
    if with_coefficients {
        header.push(columns::COEF_INTERCEPT.to_string());
        header.extend(slope_columns.iter().map(|name| columns::slope(name)));
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&header)?;

    for row in table.rows() {
        let mut record: Vec<String> = vec![row.cell_id.to_string(), row.total_count.to_string()];
        for name in &context_columns {
            record.push(row.context_counts.get(name).copied().unwrap_or(0).to_string());
        }
        for name in &category_columns {
            record.push(
                row.category_counts
                    .get(name)
                    .copied()
                    .unwrap_or(0)
                    .to_string(),
            );
        }
        if with_predictions {
            record.push(row.prediction.map(|value| value.to_string()).unwrap_or_default());
        }
        if with_coefficients {
            record.push(
                row.coefficients
                    .as_ref()
                    .map(|coefficients| coefficients.intercept.to_string())
                    .unwrap_or_default(),
            );
            for name in &slope_columns {
                record.push(
                    row.coefficients
                        .as_ref()
                        .and_then(|coefficients| coefficients.slopes.get(name))
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                );
            }
        }
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Loads a feature table persisted by [`save_feature_table`].
///
/// # Errors
///
/// Returns a [`StoreError`] if the file cannot be read, lacks the
/// `cell_id`/`total_count` columns, or contains unparseable values.
pub fn load_feature_table(path: &Path) -> Result<FeatureTable, StoreError> {
    let mut reader = csv::Reader::from_path(path)?;
    let header = reader.headers()?.clone();

    let cell_id_index = header
        .iter()
        .position(|name| name == columns::CELL_ID)
        .ok_or_else(|| StoreError::Schema {
            message: "feature table is missing the cell_id column".to_string(),
        })?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut prediction: Option<f64> = None;
        let mut intercept: Option<f64> = None;
        let mut slopes = Vec::new();

        let cell_id_field = record.get(cell_id_index).ok_or_else(|| StoreError::Schema {
            message: "feature table row is missing its cell_id field".to_string(),
        })?;
        let mut row = FeatureRow::new(parse_field(columns::CELL_ID, cell_id_field)?);

        for (name, field) in header.iter().zip(record.iter()) {
            match name {
                columns::CELL_ID => {}
                columns::TOTAL_COUNT => row.total_count = parse_field(name, field)?,
                columns::PREDICTION => {
                    if !field.is_empty() {
                        prediction = Some(parse_field(name, field)?);
                    }
                }
                columns::COEF_INTERCEPT => {
                    if !field.is_empty() {
                        intercept = Some(parse_field(name, field)?);
                    }
                }
                _ if name.starts_with(columns::COEF_PREFIX) => {
                    if !field.is_empty() {
                        let predictor = name
                            .strip_prefix(columns::COEF_PREFIX)
                            .unwrap_or(name)
                            .to_string();
                        slopes.push((predictor, parse_field(name, field)?));
                    }
                }
                _ if name.starts_with("category_") => {
                    row.category_counts
                        .insert(name.to_string(), parse_field(name, field)?);
                }
                _ => {
                    row.context_counts
                        .insert(name.to_string(), parse_field(name, field)?);
                }
            }
        }

        row.prediction = prediction;
        row.coefficients = intercept.map(|intercept| Coefficients {
            intercept,
            slopes: slopes.into_iter().collect(),
        });
        rows.push(row);
    }

    Ok(FeatureTable::new(rows))
}

/// Writes the long-format temporal table.
///
/// # Errors
///
/// Returns a [`StoreError`] if the file cannot be written.
pub fn save_temporal_table(records: &[TemporalRecord], path: &Path) -> Result<(), StoreError> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    // An empty table still needs its header row.
    if records.is_empty() {
        writer.write_record(["cell_id", "month", "hour", "weekday", "category", "count"])?;
    }
    writer.flush()?;
    Ok(())
}

/// Loads a temporal table persisted by [`save_temporal_table`].
///
/// # Errors
///
/// Returns a [`StoreError`] if the file cannot be read or parsed.
pub fn load_temporal_table(path: &Path) -> Result<Vec<TemporalRecord>, StoreError> {
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader
        .deserialize()
        .collect::<Result<Vec<TemporalRecord>, csv::Error>>()?;
    Ok(records)
}

fn parse_field<T: std::str::FromStr>(name: &str, field: &str) -> Result<T, StoreError> {
    field.parse().map_err(|_| StoreError::Schema {
        message: format!("column {name} has unparseable value {field:?}"),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn sample_table() -> FeatureTable {
        let mut first = FeatureRow::new(0);
        first.total_count = 4;
        first.context_counts.insert("streetlight_count".into(), 2);
        first.category_counts.insert("category_burglary".into(), 3);
        first.prediction = Some(3.25);
        first.coefficients = Some(Coefficients {
            intercept: 0.5,
            slopes: BTreeMap::from([("streetlight_count".to_string(), -0.125)]),
        });

        let mut second = FeatureRow::new(1);
        second.context_counts.insert("streetlight_count".into(), 0);
        second.category_counts.insert("category_burglary".into(), 0);
        // Excluded from fitting: no prediction, no coefficients.

        FeatureTable::new(vec![first, second])
    }

    #[test]
    fn feature_table_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.csv");

        let table = sample_table();
        save_feature_table(&table, &path).unwrap();
        let loaded = load_feature_table(&path).unwrap();

        assert_eq!(loaded, table);
    }

    #[test]
    fn feature_table_without_predictions_omits_the_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.csv");

        let table = FeatureTable::new(vec![FeatureRow::new(0)]);
        save_feature_table(&table, &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("prediction"));

        let loaded = load_feature_table(&path).unwrap();
        assert_eq!(loaded, table);
    }

    #[test]
    fn temporal_table_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temporal.csv");

        let records = vec![
            TemporalRecord {
                cell_id: 0,
                month: "2025-03".to_string(),
                hour: 14,
                weekday: 5,
                category: "BURGLARY".to_string(),
                count: 2,
            },
            TemporalRecord {
                cell_id: 1,
                month: "2025-04".to_string(),
                hour: 3,
                weekday: 0,
                category: "ROBBERY".to_string(),
                count: 1,
            },
        ];

        save_temporal_table(&records, &path).unwrap();
        let loaded = load_temporal_table(&path).unwrap();
        assert_eq!(loaded, records);
    }

    #[test]
    fn empty_temporal_table_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temporal.csv");

        save_temporal_table(&[], &path).unwrap();
        let loaded = load_temporal_table(&path).unwrap();
        assert!(loaded.is_empty());
    }
}
