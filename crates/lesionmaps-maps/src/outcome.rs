//! Per-patient scan outcomes and the run-level tally built from them.

use std::fmt::{self, Display};

use lesionmaps_core::errors::MapsError;
use log::{debug, warn};

/// Why a patient was left out of an accumulation run without being counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SkipReason {
    /// The stratum filter rejected the patient.
    FilterRejected,
    /// No atlas-space lesion mask could be resolved.
    MissingMask,
    /// The mask file exists but could not be read or decoded.
    UnreadableMask,
    /// The mask grid does not match the atlas grid.
    ShapeMismatch,
    /// The mask contains no lesion voxels.
    EmptyMask,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::FilterRejected => "rejected by stratum filter",
            SkipReason::MissingMask => "no atlas-space mask",
            SkipReason::UnreadableMask => "unreadable mask",
            SkipReason::ShapeMismatch => "mask shape differs from atlas",
            SkipReason::EmptyMask => "empty mask",
        };
        f.write_str(text)
    }
}

/// Result of scanning one patient during an accumulation run.
#[derive(Debug)]
pub enum ScanOutcome {
    /// The patient contributed and the success counter advanced.
    Counted,
    /// The patient was left out; the counter did not advance.
    Skipped(SkipReason),
    /// Processing the patient failed partway through.
    Failed(MapsError),
}

/// Tally of one engine run, in processing order.
#[derive(Debug, Default)]
pub struct RunSummary {
    counted: u32,
    skipped: Vec<(String, SkipReason)>,
    failed: Vec<(String, MapsError)>,
}

impl RunSummary {
    pub fn record(&mut self, patient_id: &str, outcome: ScanOutcome) {
        match outcome {
            ScanOutcome::Counted => self.counted += 1,
            ScanOutcome::Skipped(reason) => {
                debug!("{patient_id}: skipped ({reason})");
                self.skipped.push((patient_id.to_string(), reason));
            }
            ScanOutcome::Failed(err) => {
                warn!("{patient_id}: failed ({err})");
                self.failed.push((patient_id.to_string(), err));
            }
        }
    }

    /// Number of patients that contributed to the accumulators.
    pub fn counted(&self) -> u32 {
        self.counted
    }

    pub fn skipped(&self) -> &[(String, SkipReason)] {
        &self.skipped
    }

    pub fn failed(&self) -> &[(String, MapsError)] {
        &self.failed
    }

    pub fn failed_patient_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|(id, _)| id.as_str()).collect()
    }
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} counted, {} skipped, {} failed",
            self.counted,
            self.skipped.len(),
            self.failed.len()
        )
    }
}
