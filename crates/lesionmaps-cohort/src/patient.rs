//! One cohort member: raw inputs, atlas-space artifacts, and metric records.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use lesionmaps_core::config::MapsConfig;
use lesionmaps_core::errors::{ErrorInfo, MapsError};
use lesionmaps_core::ids::IdAllocator;
use log::debug;

use crate::metrics::Metrics;
use crate::registration::Registration;

/// Name of the common fixed space every patient is registered into.
pub const ATLAS_SPACE: &str = "MNI";
/// Name of the native space of the raw inputs.
pub const PATIENT_SPACE: &str = "Patient";

/// Canonical basename of the registered primary volume.
pub const REGISTERED_VOLUME_NAME: &str = "input_reg_mni.nii.gz";

/// Keyword identifying a region (brain) mask inside a patient folder.
const REGION_KEYWORD: &str = "brain";

/// A patient folder resolved against the run configuration.
#[derive(Debug)]
pub struct Patient {
    patient_id: String,
    unique_id: String,
    output_folder: PathBuf,
    volume_path: Option<PathBuf>,
    label_path: Option<PathBuf>,
    region_mask_path: Option<PathBuf>,
    registration: Option<Registration>,
    metrics: BTreeMap<String, Metrics>,
    ids: IdAllocator,
}

impl Patient {
    /// Builds a patient from its input folder, classifying the contained
    /// files and reloading any artifacts persisted by a previous run.
    ///
    /// `unique_id` comes from the cohort-level allocator; the display id is
    /// the folder name, trimmed, lower-cased, with whitespace collapsed to
    /// underscores.
    pub fn from_folder(
        folder: &Path,
        unique_id: String,
        config: &MapsConfig,
    ) -> Result<Self, MapsError> {
        let patient_id = clean_patient_id(folder);
        let mut volume_path: Option<PathBuf> = None;
        let mut label_path: Option<PathBuf> = None;
        let mut region_mask_path: Option<PathBuf> = None;

        let entries = fs::read_dir(folder).map_err(|err| {
            MapsError::Cohort(
                ErrorInfo::new("patient-scan", "failed to list patient folder")
                    .with_patient(&patient_id)
                    .with_context("path", folder.display().to_string())
                    .with_hint(err.to_string()),
            )
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_nifti(p))
            .collect();
        files.sort();

        for file in files {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let slot = if name.contains(&config.gt_files_suffix) {
                (&mut label_path, "lesion mask")
            } else if name.to_lowercase().contains(REGION_KEYWORD) {
                (&mut region_mask_path, "region mask")
            } else {
                (&mut volume_path, "primary volume")
            };
            if let Some(existing) = slot.0 {
                return Err(MapsError::Cohort(
                    ErrorInfo::new("patient-ambiguous-file", "multiple files match one category")
                        .with_patient(&patient_id)
                        .with_context("category", slot.1)
                        .with_context("first", existing.display().to_string())
                        .with_context("second", file.display().to_string()),
                ));
            }
            *slot.0 = Some(file);
        }

        let output_folder = config.output_folder.join(&unique_id);
        fs::create_dir_all(&output_folder).map_err(|err| {
            MapsError::Cohort(
                ErrorInfo::new("patient-mkdir", "failed to create patient output folder")
                    .with_patient(&patient_id)
                    .with_context("path", output_folder.display().to_string())
                    .with_hint(err.to_string()),
            )
        })?;

        let mut ids = IdAllocator::new();
        let registration = Registration::open_cached(
            ids.allocate('R'),
            &output_folder,
            ATLAS_SPACE,
            PATIENT_SPACE,
        )?;
        if registration.is_some() {
            debug!("{patient_id}: reloaded cached registration");
        }

        let mut metrics = BTreeMap::new();
        let target_class = config.target_class();
        let record = Metrics::open(
            ids.allocate('M'),
            &output_folder,
            &target_class,
            &config.features,
        )?;
        metrics.insert(target_class, record);

        Ok(Self {
            patient_id,
            unique_id,
            output_folder,
            volume_path,
            label_path,
            region_mask_path,
            registration,
            metrics,
            ids,
        })
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn output_folder(&self) -> &Path {
        &self.output_folder
    }

    pub fn volume_path(&self) -> Option<&Path> {
        self.volume_path.as_deref()
    }

    pub fn label_path(&self) -> Option<&Path> {
        self.label_path.as_deref()
    }

    pub fn region_mask_path(&self) -> Option<&Path> {
        self.region_mask_path.as_deref()
    }

    /// Canonical location of the atlas-space primary volume.
    pub fn registered_volume_file(&self) -> PathBuf {
        self.output_folder.join(REGISTERED_VOLUME_NAME)
    }

    /// Canonical location of the atlas-space lesion mask for the configured
    /// ground-truth suffix.
    pub fn registered_label_file(&self, gt_files_suffix: &str) -> PathBuf {
        self.output_folder
            .join(format!("input_reg_mni_{gt_files_suffix}"))
    }

    /// The atlas-space volume to read: the registered file when present,
    /// otherwise the raw file when inputs are declared pre-registered.
    pub fn atlas_volume_path(&self, use_registered_data: bool) -> Option<PathBuf> {
        let registered = self.registered_volume_file();
        if registered.exists() {
            Some(registered)
        } else if use_registered_data {
            self.volume_path.clone()
        } else {
            None
        }
    }

    /// Same resolution as [`Self::atlas_volume_path`], for the lesion mask.
    pub fn atlas_label_path(
        &self,
        gt_files_suffix: &str,
        use_registered_data: bool,
    ) -> Option<PathBuf> {
        let registered = self.registered_label_file(gt_files_suffix);
        if registered.exists() {
            Some(registered)
        } else if use_registered_data {
            self.label_path.clone()
        } else {
            None
        }
    }

    pub fn registration(&self) -> Option<&Registration> {
        self.registration.as_ref()
    }

    pub fn set_registration(&mut self, registration: Registration) {
        self.registration = Some(registration);
    }

    /// Allocates a registration uid from the patient-scoped counter.
    pub fn next_registration_uid(&mut self) -> String {
        self.ids.allocate('R')
    }

    pub fn metrics(&self, target_class: &str) -> Option<&Metrics> {
        self.metrics.get(target_class)
    }

    pub fn metrics_mut(&mut self, target_class: &str) -> Option<&mut Metrics> {
        self.metrics.get_mut(target_class)
    }
}

/// Folder name, trimmed, lower-cased, with whitespace runs mapped to `_`.
fn clean_patient_id(folder: &Path) -> String {
    let raw = folder
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

fn is_nifti(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.ends_with(".nii") || name.ends_with(".nii.gz")
}

#[cfg(test)]
mod tests {
    use super::*;
    use lesionmaps_core::config::Task;
    use std::io::Write;

    fn touch(path: &Path) {
        let mut file = std::fs::File::create(path).expect("create");
        file.write_all(b"x").expect("write");
    }

    fn config(root: &Path) -> MapsConfig {
        MapsConfig {
            task: Task::Heatmap,
            input_folder: root.join("in"),
            output_folder: root.join("out"),
            atlas_path: root.join("atlas.nii.gz"),
            gt_files_suffix: "label_tumor.nii.gz".to_string(),
            sequence_type: "T1-CE".to_string(),
            use_registered_data: true,
            extra_parameters_file: None,
            strata: Default::default(),
            features: Default::default(),
            inference_command: None,
        }
    }

    #[test]
    fn classifies_volume_label_and_region_mask() {
        let dir = tempfile::tempdir().expect("tempdir");
        let folder = dir.path().join("in").join("Pat 001");
        fs::create_dir_all(&folder).expect("mkdir");
        touch(&folder.join("t1.nii.gz"));
        touch(&folder.join("t1_label_tumor.nii.gz"));
        touch(&folder.join("t1_brain_mask.nii.gz"));
        touch(&folder.join("notes.txt"));

        let cfg = config(dir.path());
        let patient = Patient::from_folder(&folder, "P0_pat_001".to_string(), &cfg).expect("load");
        assert_eq!(patient.patient_id(), "pat_001");
        assert!(patient.volume_path().expect("vol").ends_with("t1.nii.gz"));
        assert!(patient
            .label_path()
            .expect("label")
            .ends_with("t1_label_tumor.nii.gz"));
        assert!(patient
            .region_mask_path()
            .expect("region")
            .ends_with("t1_brain_mask.nii.gz"));
        assert!(patient.output_folder().is_dir());
    }

    #[test]
    fn duplicate_category_match_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let folder = dir.path().join("in").join("pat_a");
        fs::create_dir_all(&folder).expect("mkdir");
        touch(&folder.join("a_label_tumor.nii.gz"));
        touch(&folder.join("b_label_tumor.nii.gz"));

        let cfg = config(dir.path());
        let err = Patient::from_folder(&folder, "P0_pat_a".to_string(), &cfg)
            .err()
            .expect("error");
        assert_eq!(err.info().code, "patient-ambiguous-file");
        assert_eq!(err.info().context.get("patient").map(String::as_str), Some("pat_a"));
    }

    #[test]
    fn atlas_paths_prefer_registered_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let folder = dir.path().join("in").join("pat_a");
        fs::create_dir_all(&folder).expect("mkdir");
        touch(&folder.join("t1.nii.gz"));
        touch(&folder.join("t1_label_tumor.nii.gz"));

        let cfg = config(dir.path());
        let patient = Patient::from_folder(&folder, "P0_pat_a".to_string(), &cfg).expect("load");

        // No registered file yet: fall back to the raw inputs.
        let label = patient
            .atlas_label_path(&cfg.gt_files_suffix, true)
            .expect("raw fallback");
        assert!(label.ends_with("t1_label_tumor.nii.gz"));
        assert!(patient.atlas_label_path(&cfg.gt_files_suffix, false).is_none());

        touch(&patient.registered_label_file(&cfg.gt_files_suffix));
        let label = patient
            .atlas_label_path(&cfg.gt_files_suffix, false)
            .expect("registered");
        assert!(label.ends_with("input_reg_mni_label_tumor.nii.gz"));
    }

    #[test]
    fn cached_registration_is_reloaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let folder = dir.path().join("in").join("pat_a");
        fs::create_dir_all(&folder).expect("mkdir");
        touch(&folder.join("t1.nii.gz"));

        let cfg = config(dir.path());
        let pair = cfg
            .output_folder
            .join("P0_pat_a")
            .join("Transforms")
            .join("Patient-to-MNI");
        fs::create_dir_all(&pair).expect("mkdir");
        touch(&pair.join("forward_warp.nii.gz"));

        let patient = Patient::from_folder(&folder, "P0_pat_a".to_string(), &cfg).expect("load");
        let reg = patient.registration().expect("cached");
        assert_eq!(reg.forward_transforms().len(), 1);
    }
}
