//! Metrics task driver: per-patient steps, then the cohort-wide merge.

use std::collections::BTreeSet;

use lesionmaps_cohort::Cohort;
use lesionmaps_core::config::MapsConfig;
use lesionmaps_core::errors::{ErrorInfo, MapsError};
use log::warn;

use crate::aggregate::aggregate_metrics;
use crate::collab::InferenceRunner;
use crate::location::compute_location_metrics;
use crate::size::compute_size_metrics;

/// Runs the metrics task over the whole cohort.
///
/// Each patient runs the size step then the location step; a failing patient
/// is logged and excluded from the merge, the loop continues. Location groups
/// require a collaborator; requesting them without one wired in is a
/// configuration error.
pub fn run_metrics_task(
    config: &MapsConfig,
    cohort: &mut Cohort,
    runner: Option<&dyn InferenceRunner>,
) -> Result<(), MapsError> {
    if config.features.any_location() && runner.is_none() {
        return Err(MapsError::Config(ErrorInfo::new(
            "config-no-inference",
            "location metrics are requested but no inference command is configured",
        )));
    }

    let mut failed: BTreeSet<String> = BTreeSet::new();
    for patient in cohort.patients_mut() {
        let result = compute_size_metrics(patient, config).and_then(|()| match runner {
            Some(runner) if config.features.any_location() => {
                compute_location_metrics(patient, config, runner)
            }
            _ => Ok(()),
        });
        if let Err(err) = result {
            warn!("{}: metrics computation failed ({err})", patient.patient_id());
            failed.insert(patient.patient_id().to_string());
        }
    }

    aggregate_metrics(cohort, &failed, &config.target_class(), &config.output_folder)?;
    if !failed.is_empty() {
        warn!(
            "{} patient(s) excluded from the merged table: {}",
            failed.len(),
            failed.iter().cloned().collect::<Vec<_>>().join(", ")
        );
    }
    Ok(())
}
