//! Cohort-wide merge of the per-patient metric tables.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use lesionmaps_cohort::Cohort;
use lesionmaps_core::errors::{ErrorInfo, MapsError};
use log::info;

/// Merges every successful patient's `computed_metrics_<class>.csv` into
/// `all_metrics_<class>.csv` under the output root, with a `Patient_ID`
/// column prepended.
///
/// The header of the first merged patient becomes the reference; a differing
/// header, or a missing table for a patient whose metric steps succeeded, is
/// an aggregation error. Patients named in `failed` are excluded.
pub fn aggregate_metrics(
    cohort: &Cohort,
    failed: &BTreeSet<String>,
    target_class: &str,
    output_root: &Path,
) -> Result<PathBuf, MapsError> {
    let output_path = output_root.join(format!("all_metrics_{target_class}.csv"));
    let mut reference_header: Option<StringRecord> = None;
    let mut rows: Vec<(String, StringRecord)> = Vec::new();

    for patient in cohort.patients() {
        if failed.contains(patient.patient_id()) {
            continue;
        }
        let record = patient.metrics(target_class).ok_or_else(|| {
            MapsError::Aggregate(
                ErrorInfo::new("aggregate-no-record", "no metrics record for the target class")
                    .with_patient(patient.patient_id())
                    .with_context("class", target_class),
            )
        })?;
        let table_path = record.filepath();
        if !table_path.exists() {
            return Err(MapsError::Aggregate(
                ErrorInfo::new(
                    "aggregate-missing-table",
                    "metrics table missing for a successful patient",
                )
                .with_patient(patient.patient_id())
                .with_context("path", table_path.display().to_string()),
            ));
        }
        let (header, row) = read_single_row(table_path, patient.patient_id())?;
        match &reference_header {
            None => reference_header = Some(header),
            Some(reference) => {
                if *reference != header {
                    return Err(MapsError::Aggregate(
                        ErrorInfo::new(
                            "aggregate-header-mismatch",
                            "metrics table header differs from the first patient's",
                        )
                        .with_patient(patient.patient_id())
                        .with_context("path", table_path.display().to_string()),
                    ));
                }
            }
        }
        rows.push((patient.patient_id().to_string(), row));
    }

    let Some(header) = reference_header else {
        return Err(MapsError::Aggregate(ErrorInfo::new(
            "aggregate-empty",
            "no patient metrics tables to merge",
        )));
    };

    let wrap = |err: csv::Error| {
        MapsError::Aggregate(
            ErrorInfo::new("aggregate-write", "failed to write merged metrics table")
                .with_context("path", output_path.display().to_string())
                .with_hint(err.to_string()),
        )
    };
    let mut writer = WriterBuilder::new().from_path(&output_path).map_err(wrap)?;
    let mut merged_header = vec!["Patient_ID".to_string()];
    merged_header.extend(header.iter().map(str::to_string));
    writer.write_record(&merged_header).map_err(wrap)?;
    for (patient_id, row) in &rows {
        let mut merged = vec![patient_id.clone()];
        merged.extend(row.iter().map(str::to_string));
        writer.write_record(&merged).map_err(wrap)?;
    }
    writer.flush().map_err(|err| wrap(err.into()))?;

    info!(
        "merged {} patient metrics tables into {}",
        rows.len(),
        output_path.display()
    );
    Ok(output_path)
}

fn read_single_row(
    path: &Path,
    patient_id: &str,
) -> Result<(StringRecord, StringRecord), MapsError> {
    let wrap = |err: csv::Error| {
        MapsError::Aggregate(
            ErrorInfo::new("aggregate-read", "failed to read patient metrics table")
                .with_patient(patient_id)
                .with_context("path", path.display().to_string())
                .with_hint(err.to_string()),
        )
    };
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(wrap)?;
    let header = reader.headers().map_err(wrap)?.clone();
    let row = reader
        .records()
        .next()
        .ok_or_else(|| {
            MapsError::Aggregate(
                ErrorInfo::new("aggregate-empty-table", "patient metrics table has no row")
                    .with_patient(patient_id)
                    .with_context("path", path.display().to_string()),
            )
        })?
        .map_err(wrap)?;
    Ok((header, row))
}
