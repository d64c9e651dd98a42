//! Clinical side-table used for stratification.
//!
//! One row per patient id, arbitrary named columns. Values stay strings;
//! numeric interpretation happens at lookup time so a column can mix numeric
//! and categorical use across runs.

use std::collections::BTreeSet;
use std::path::Path;

use csv::ReaderBuilder;
use lesionmaps_core::errors::{ErrorInfo, MapsError};

/// Patient id column name recognized in the side-table header.
const ID_COLUMN: &str = "Patient";

#[derive(Debug, Clone)]
pub struct ParameterTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    id_column: usize,
}

impl ParameterTable {
    /// Reads the side-table from a CSV file with a header row. The patient id
    /// column is the one named `Patient`, or the first column otherwise.
    pub fn load(path: &Path) -> Result<Self, MapsError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|err| {
                MapsError::Cohort(
                    ErrorInfo::new("params-open", "failed to open extra parameters table")
                        .with_context("path", path.display().to_string())
                        .with_hint(err.to_string()),
                )
            })?;
        let columns: Vec<String> = reader
            .headers()
            .map_err(|err| {
                MapsError::Cohort(
                    ErrorInfo::new("params-header", "failed to read side-table header")
                        .with_context("path", path.display().to_string())
                        .with_hint(err.to_string()),
                )
            })?
            .iter()
            .map(|s| s.trim().to_string())
            .collect();
        if columns.is_empty() {
            return Err(MapsError::Cohort(
                ErrorInfo::new("params-empty", "extra parameters table has no columns")
                    .with_context("path", path.display().to_string()),
            ));
        }
        let id_column = columns.iter().position(|c| c == ID_COLUMN).unwrap_or(0);
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| {
                MapsError::Cohort(
                    ErrorInfo::new("params-row", "failed to read side-table row")
                        .with_context("path", path.display().to_string())
                        .with_hint(err.to_string()),
                )
            })?;
            rows.push(record.iter().map(|s| s.trim().to_string()).collect());
        }
        Ok(Self {
            columns,
            rows,
            id_column,
        })
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Value of `column` for the first row whose id matches `patient_id`
    /// (ids are compared as strings).
    pub fn value(&self, patient_id: &str, column: &str) -> Option<&str> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows
            .iter()
            .find(|row| row.get(self.id_column).map(String::as_str) == Some(patient_id))
            .and_then(|row| row.get(col))
            .map(String::as_str)
    }

    /// Numeric value of `column` for `patient_id`, when present and parseable.
    pub fn numeric(&self, patient_id: &str, column: &str) -> Option<f64> {
        self.value(patient_id, column)?.parse::<f64>().ok()
    }

    /// Distinct non-empty values observed in `column`, sorted.
    pub fn distinct_values(&self, column: &str) -> Vec<String> {
        let Some(col) = self.columns.iter().position(|c| c == column) else {
            return Vec::new();
        };
        let set: BTreeSet<String> = self
            .rows
            .iter()
            .filter_map(|row| row.get(col))
            .filter(|v| !v.is_empty())
            .cloned()
            .collect();
        set.into_iter().collect()
    }
}
