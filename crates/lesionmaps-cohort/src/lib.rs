//! Cohort data model for the lesionmaps pipeline: patients resolved from an
//! input tree, cached registration transforms, per-patient metric records,
//! and the clinical side-table used for stratification.

pub mod cohort;
pub mod metrics;
pub mod params;
pub mod patient;
pub mod registration;

pub use cohort::Cohort;
pub use metrics::{
    AtlasOverlaps, BrainLocationMetrics, Metrics, MultifocalityMetrics, SizeMetrics,
};
pub use params::ParameterTable;
pub use patient::{Patient, ATLAS_SPACE, PATIENT_SPACE};
pub use registration::Registration;
