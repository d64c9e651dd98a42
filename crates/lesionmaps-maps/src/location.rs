//! Location metrics obtained through the anatomical inference collaborator.
//!
//! The step stages the patient's atlas-space files into a scratch exchange
//! folder, writes a declarative job description, invokes the collaborator,
//! and reads the groups it asked for back out of the produced clinical
//! report.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use lesionmaps_cohort::{BrainLocationMetrics, Metrics, MultifocalityMetrics, Patient};
use lesionmaps_core::config::{FeatureSelection, MapsConfig};
use lesionmaps_core::errors::{ErrorInfo, MapsError};
use log::debug;
use serde_json::{json, Value};

use crate::collab::InferenceRunner;
use crate::scratch::Scratch;

/// Basename of the report the collaborator must produce.
const REPORT_NAME: &str = "neuro_clinical_report.json";

/// Computes the location groups for one patient and persists the record.
///
/// Only the groups that are requested and not yet complete are asked of the
/// collaborator; the step is a no-op when nothing is missing.
pub fn compute_location_metrics(
    patient: &mut Patient,
    config: &MapsConfig,
    runner: &dyn InferenceRunner,
) -> Result<(), MapsError> {
    if !config.features.any_location() {
        return Ok(());
    }
    let target_class = config.target_class();
    let missing = match patient.metrics(&target_class) {
        Some(record) => missing_groups(record, &config.features),
        None => {
            return Err(MapsError::Metrics(
                ErrorInfo::new("location-no-record", "no metrics record for the target class")
                    .with_patient(patient.patient_id())
                    .with_context("class", target_class),
            ))
        }
    };
    if missing.is_empty() {
        debug!("{}: location metrics already computed", patient.patient_id());
        return Ok(());
    }

    let step_error = |code: &str, message: &str| {
        MapsError::Metrics(
            ErrorInfo::new(code, message)
                .with_patient(patient.patient_id())
                .with_context("step", "location"),
        )
    };
    let volume_path = patient
        .atlas_volume_path(config.use_registered_data)
        .ok_or_else(|| step_error("location-no-volume", "no atlas-space volume to stage"))?;
    let mask_path = patient
        .atlas_label_path(&config.gt_files_suffix, config.use_registered_data)
        .ok_or_else(|| step_error("location-no-mask", "no atlas-space lesion mask to stage"))?;

    let scratch = Scratch::create(&config.output_folder)?;
    let staging = scratch.input().join("T0");
    fs::create_dir_all(&staging)
        .map_err(|err| step_error("location-stage", &err.to_string()))?;
    let prefix = config.sequence_prefix();
    copy_staged(&volume_path, &staging.join(format!("{prefix}.nii.gz")), patient)?;
    copy_staged(
        &mask_path,
        &staging.join(format!("{prefix}_{}", config.gt_files_suffix)),
        patient,
    )?;

    let job_path = scratch.input().join("inference_job.json");
    let job = job_description(config, &scratch, &missing, &target_class);
    fs::write(
        &job_path,
        serde_json::to_string_pretty(&job)
            .map_err(|err| step_error("location-job", &err.to_string()))?,
    )
    .map_err(|err| step_error("location-job", &err.to_string()))?;

    runner.run(&job_path).map_err(|err| {
        MapsError::Metrics(
            err.info()
                .clone()
                .with_patient(patient.patient_id())
                .with_context("step", "location"),
        )
    })?;

    let report_path = scratch.output().join(REPORT_NAME);
    if !report_path.exists() {
        return Err(step_error(
            "location-no-report",
            "collaborator produced no clinical report",
        ));
    }
    let report: Value = serde_json::from_str(
        &fs::read_to_string(&report_path)
            .map_err(|err| step_error("location-report-read", &err.to_string()))?,
    )
    .map_err(|err| step_error("location-report-parse", &err.to_string()))?;

    let patient_id = patient.patient_id().to_string();
    let record = patient.metrics_mut(&target_class).ok_or_else(|| {
        MapsError::Metrics(
            ErrorInfo::new("location-no-record", "no metrics record for the target class")
                .with_patient(patient_id),
        )
    })?;
    extract_groups(&report, &missing, record)?;
    record.save()
}

/// Which location groups still need the collaborator.
#[derive(Debug, Default, PartialEq)]
struct MissingGroups {
    brain_location: bool,
    multifocality: bool,
    cortical_atlases: Vec<String>,
    subcortical_atlases: Vec<String>,
}

impl MissingGroups {
    fn is_empty(&self) -> bool {
        !self.brain_location
            && !self.multifocality
            && self.cortical_atlases.is_empty()
            && self.subcortical_atlases.is_empty()
    }
}

fn missing_groups(record: &Metrics, features: &FeatureSelection) -> MissingGroups {
    MissingGroups {
        brain_location: features.brain_location && !record.brain_location_complete(),
        multifocality: features.multifocality && !record.multifocality_complete(),
        cortical_atlases: features
            .cortical_atlases
            .iter()
            .filter(|a| !record.cortical.contains_key(*a))
            .cloned()
            .collect(),
        subcortical_atlases: features
            .subcortical_atlases
            .iter()
            .filter(|a| !record.subcortical.contains_key(*a))
            .cloned()
            .collect(),
    }
}

/// One-task job description plus the runtime section naming only the groups
/// still to compute.
fn job_description(
    config: &MapsConfig,
    scratch: &Scratch,
    missing: &MissingGroups,
    target_class: &str,
) -> Value {
    let mut target = target_class.to_string();
    if let Some(first) = target.get_mut(..1) {
        first.make_ascii_uppercase();
    }
    json!({
        "input_folder": scratch.input(),
        "output_folder": scratch.output(),
        "pipeline": {
            "1": {
                "task": "Features computation",
                "input": { "timestamp": 0, "sequence": config.sequence_type },
                "target": target,
                "space": "Patient",
            }
        },
        "runtime": {
            "brain_location": missing.brain_location,
            "multifocality": missing.multifocality,
            "cortical_atlases": missing.cortical_atlases,
            "subcortical_atlases": missing.subcortical_atlases,
        },
    })
}

/// Reads the requested groups out of the nested clinical report.
fn extract_groups(
    report: &Value,
    missing: &MissingGroups,
    record: &mut Metrics,
) -> Result<(), MapsError> {
    if missing.brain_location {
        record.brain_location = Some(BrainLocationMetrics {
            left_laterality_pct: report_number(report, "/Main/Total/Left laterality (%)")?,
            right_laterality_pct: report_number(report, "/Main/Total/Right laterality (%)")?,
            midline_crossing: report_bool(report, "/Main/Total/Midline crossing")?,
        });
    }
    if missing.multifocality {
        record.multifocality = Some(MultifocalityMetrics {
            multifocal: report_bool(report, "/Overall/Multifocality")?,
            parts: report_number(report, "/Overall/Tumor parts nb")? as u64,
            max_distance_mm: report_number(report, "/Overall/Multifocal distance (mm)")?,
        });
    }
    for atlas in &missing.cortical_atlases {
        let overlaps =
            report_structures(report, &format!("/Main/Total/CorticalStructures/{atlas}"))?;
        record.cortical.insert(atlas.clone(), overlaps);
    }
    for atlas in &missing.subcortical_atlases {
        let overlaps =
            report_structures(report, &format!("/Main/Total/SubcorticalStructures/{atlas}"))?;
        record.subcortical.insert(atlas.clone(), overlaps);
    }
    Ok(())
}

fn report_value<'a>(report: &'a Value, pointer: &str) -> Result<&'a Value, MapsError> {
    report.pointer(pointer).ok_or_else(|| {
        MapsError::Metrics(
            ErrorInfo::new("location-report-key", "clinical report is missing a value")
                .with_context("key", pointer),
        )
    })
}

fn report_number(report: &Value, pointer: &str) -> Result<f64, MapsError> {
    let value = report_value(report, pointer)?;
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| {
            MapsError::Metrics(
                ErrorInfo::new("location-report-type", "clinical report value is not numeric")
                    .with_context("key", pointer),
            )
        })
}

fn report_bool(report: &Value, pointer: &str) -> Result<bool, MapsError> {
    let value = report_value(report, pointer)?;
    value
        .as_bool()
        .or_else(|| match value.as_str()?.trim().to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        })
        .ok_or_else(|| {
            MapsError::Metrics(
                ErrorInfo::new("location-report-type", "clinical report value is not boolean")
                    .with_context("key", pointer),
            )
        })
}

fn report_structures(
    report: &Value,
    pointer: &str,
) -> Result<BTreeMap<String, f64>, MapsError> {
    let object = report_value(report, pointer)?.as_object().ok_or_else(|| {
        MapsError::Metrics(
            ErrorInfo::new("location-report-type", "clinical report section is not an object")
                .with_context("key", pointer),
        )
    })?;
    let mut overlaps = BTreeMap::new();
    for (structure, value) in object {
        let fraction = value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .ok_or_else(|| {
                MapsError::Metrics(
                    ErrorInfo::new("location-report-type", "structure overlap is not numeric")
                        .with_context("key", pointer)
                        .with_context("structure", structure.clone()),
                )
            })?;
        overlaps.insert(structure.clone(), fraction);
    }
    Ok(overlaps)
}

fn copy_staged(source: &Path, target: &Path, patient: &Patient) -> Result<(), MapsError> {
    fs::copy(source, target).map_err(|err| {
        MapsError::Metrics(
            ErrorInfo::new("location-stage", "failed to stage file for the collaborator")
                .with_patient(patient.patient_id())
                .with_context("source", source.display().to_string())
                .with_context("target", target.display().to_string())
                .with_hint(err.to_string()),
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> Value {
        json!({
            "Main": {
                "Total": {
                    "Left laterality (%)": 93.2,
                    "Right laterality (%)": 6.8,
                    "Midline crossing": "False",
                    "CorticalStructures": {
                        "MNI": { "Frontal": 0.61, "Parietal": 0.12 }
                    },
                    "SubcorticalStructures": {
                        "BCB": { "Tract_A": "0.05" }
                    }
                }
            },
            "Overall": {
                "Multifocality": true,
                "Tumor parts nb": 2,
                "Multifocal distance (mm)": 37.5
            }
        })
    }

    #[test]
    fn extracts_only_the_requested_groups() {
        let dir = tempfile::tempdir().expect("tempdir");
        let features = FeatureSelection {
            tumor_size: true,
            brain_location: true,
            multifocality: false,
            cortical_atlases: vec!["MNI".to_string()],
            subcortical_atlases: Vec::new(),
        };
        let mut record =
            Metrics::open("M0".to_string(), dir.path(), "tumor", &features).expect("open");
        let missing = missing_groups(&record, &features);
        assert!(missing.brain_location);
        assert!(!missing.multifocality);

        extract_groups(&sample_report(), &missing, &mut record).expect("extract");
        let brain = record.brain_location.as_ref().expect("brain");
        assert!((brain.left_laterality_pct - 93.2).abs() < 1e-9);
        assert!(!brain.midline_crossing);
        assert!(record.multifocality.is_none());
        assert!((record.cortical["MNI"]["Parietal"] - 0.12).abs() < 1e-9);
        assert!(record.subcortical.is_empty());
    }

    #[test]
    fn complete_groups_are_not_requested_again() {
        let dir = tempfile::tempdir().expect("tempdir");
        let features = FeatureSelection {
            tumor_size: true,
            brain_location: false,
            multifocality: true,
            cortical_atlases: vec!["MNI".to_string()],
            subcortical_atlases: vec!["BCB".to_string()],
        };
        let mut record =
            Metrics::open("M0".to_string(), dir.path(), "tumor", &features).expect("open");
        record.cortical.insert("MNI".to_string(), BTreeMap::new());

        let missing = missing_groups(&record, &features);
        assert!(missing.cortical_atlases.is_empty());
        assert_eq!(missing.subcortical_atlases, vec!["BCB".to_string()]);
        assert!(missing.multifocality);
    }

    #[test]
    fn missing_report_key_is_an_error() {
        let report = json!({ "Main": { "Total": {} } });
        let err = report_number(&report, "/Main/Total/Left laterality (%)")
            .err()
            .expect("error");
        assert_eq!(err.info().code, "location-report-key");
    }
}
