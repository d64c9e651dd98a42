//! External collaborators behind traits: registration transform computation
//! and anatomical feature inference. The pipeline only ever talks to these
//! interfaces; concrete engines are wired in by the caller.

use std::path::{Path, PathBuf};
use std::process::Command;

use lesionmaps_cohort::{Cohort, Patient, Registration, ATLAS_SPACE, PATIENT_SPACE};
use lesionmaps_core::config::MapsConfig;
use lesionmaps_core::errors::{ErrorInfo, MapsError};
use log::{info, warn};

/// Interpolation used when resampling a volume through a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// For intensity volumes.
    Linear,
    /// For label masks.
    NearestNeighbor,
}

/// Transform files produced by one registration, before persisting.
#[derive(Debug, Clone)]
pub struct TransformPair {
    pub forward: Vec<PathBuf>,
    pub inverse: Vec<PathBuf>,
}

/// Computes and applies spatial transforms between two volumes.
pub trait RegistrationEngine {
    /// Registers `moving` onto `fixed`, optionally restricted to `mask`,
    /// returning the transform files in both directions.
    fn compute_transforms(
        &self,
        fixed: &Path,
        moving: &Path,
        mask: Option<&Path>,
    ) -> Result<TransformPair, MapsError>;

    /// Resamples `input` through `transforms` onto the fixed grid, writing
    /// the result to `output`.
    fn apply_transform(
        &self,
        input: &Path,
        transforms: &[PathBuf],
        output: &Path,
        interpolation: Interpolation,
    ) -> Result<(), MapsError>;
}

/// Brings every patient's lesion mask into atlas space ahead of an
/// accumulation run.
///
/// Transform computation is skipped for patients with a cached registration;
/// application is skipped when the registered file already exists. A
/// collaborator failure leaves the patient without a registered mask (it will
/// be skipped, uncounted, by the engine) and the pre-pass moves on.
pub fn registration_prepass(
    cohort: &mut Cohort,
    config: &MapsConfig,
    engine: &dyn RegistrationEngine,
) {
    for patient in cohort.patients_mut() {
        if let Err(err) = register_patient(patient, config, engine) {
            warn!("{}: registration pre-pass failed ({err})", patient.patient_id());
        }
    }
}

fn register_patient(
    patient: &mut Patient,
    config: &MapsConfig,
    engine: &dyn RegistrationEngine,
) -> Result<(), MapsError> {
    if patient.registration().is_none() {
        let moving = patient.volume_path().ok_or_else(|| {
            MapsError::Collaborator(
                ErrorInfo::new("registration-no-volume", "patient has no primary volume")
                    .with_patient(patient.patient_id()),
            )
        })?;
        let pair =
            engine.compute_transforms(&config.atlas_path, moving, patient.region_mask_path())?;
        let uid = patient.next_registration_uid();
        let registration = Registration::create(
            uid,
            patient.output_folder(),
            ATLAS_SPACE,
            PATIENT_SPACE,
            &pair.forward,
            &pair.inverse,
        )?;
        patient.set_registration(registration);
        info!("{}: registered onto {ATLAS_SPACE}", patient.patient_id());
    }

    let forward = patient
        .registration()
        .map(|r| r.forward_transforms().to_vec())
        .unwrap_or_default();

    let registered_volume = patient.registered_volume_file();
    if !registered_volume.exists() {
        if let Some(volume) = patient.volume_path() {
            engine.apply_transform(volume, &forward, &registered_volume, Interpolation::Linear)?;
        }
    }
    let registered_label = patient.registered_label_file(&config.gt_files_suffix);
    if !registered_label.exists() {
        if let Some(label) = patient.label_path() {
            engine.apply_transform(
                label,
                &forward,
                &registered_label,
                Interpolation::NearestNeighbor,
            )?;
        }
    }
    Ok(())
}

/// Runs the anatomical feature inference collaborator on a prepared job.
pub trait InferenceRunner {
    /// Executes the job described by `job_file`; on success the collaborator
    /// has populated the job's output folder.
    fn run(&self, job_file: &Path) -> Result<(), MapsError>;
}

/// [`InferenceRunner`] that spawns a configured executable with the job file
/// as its single argument.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    command: PathBuf,
}

impl CommandRunner {
    pub fn new(command: PathBuf) -> Self {
        Self { command }
    }
}

impl InferenceRunner for CommandRunner {
    fn run(&self, job_file: &Path) -> Result<(), MapsError> {
        let output = Command::new(&self.command)
            .arg(job_file)
            .output()
            .map_err(|err| {
                MapsError::Collaborator(
                    ErrorInfo::new("inference-spawn", "failed to launch inference command")
                        .with_context("command", self.command.display().to_string())
                        .with_hint(err.to_string()),
                )
            })?;
        if !output.status.success() {
            return Err(MapsError::Collaborator(
                ErrorInfo::new("inference-exit", "inference command reported failure")
                    .with_context("command", self.command.display().to_string())
                    .with_context("status", output.status.to_string())
                    .with_hint(String::from_utf8_lossy(&output.stderr).trim().to_string()),
            ));
        }
        Ok(())
    }
}
