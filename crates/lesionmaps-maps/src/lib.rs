//! Cohort-level computation: heatmap accumulation in atlas space, per-patient
//! size and location metrics, stratified reruns, and the cohort-wide merge.

pub mod aggregate;
pub mod collab;
pub mod driver;
pub mod heatmap;
pub mod location;
pub mod outcome;
pub mod scratch;
pub mod size;
pub mod strata;

pub use aggregate::aggregate_metrics;
pub use collab::{
    registration_prepass, CommandRunner, InferenceRunner, Interpolation, RegistrationEngine,
    TransformPair,
};
pub use driver::run_metrics_task;
pub use heatmap::{HeatmapEngine, StratumFilter};
pub use location::compute_location_metrics;
pub use outcome::{RunSummary, ScanOutcome, SkipReason};
pub use size::compute_size_metrics;
pub use strata::{categorical_strata, dense_strata, run_heatmap_task, Stratum};
