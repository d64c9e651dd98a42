//! Cohort discovery: one patient per subfolder of the input root.

use std::fs;
use std::path::PathBuf;

use lesionmaps_core::config::MapsConfig;
use lesionmaps_core::errors::{ErrorInfo, MapsError};
use lesionmaps_core::ids::IdAllocator;
use log::warn;

use crate::params::ParameterTable;
use crate::patient::Patient;

/// The loaded cohort: patients in folder-name order plus the optional
/// clinical side-table.
#[derive(Debug)]
pub struct Cohort {
    patients: Vec<Patient>,
    parameters: Option<ParameterTable>,
}

impl Cohort {
    /// Enumerates the immediate subfolders of the input root and builds one
    /// patient per folder. A patient that fails to load is logged with its
    /// folder and skipped; the rest of the cohort still loads.
    pub fn load(config: &MapsConfig) -> Result<Self, MapsError> {
        let entries = fs::read_dir(&config.input_folder).map_err(|err| {
            MapsError::Cohort(
                ErrorInfo::new("cohort-scan", "failed to list cohort input folder")
                    .with_context("path", config.input_folder.display().to_string())
                    .with_hint(err.to_string()),
            )
        })?;
        let mut folders: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        folders.sort();

        let mut ids = IdAllocator::new();
        let mut patients = Vec::with_capacity(folders.len());
        for folder in folders {
            let clean = folder
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
                .trim()
                .to_lowercase()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join("_");
            let unique_id = format!("{}_{clean}", ids.allocate('P'));
            match Patient::from_folder(&folder, unique_id, config) {
                Ok(patient) => patients.push(patient),
                Err(err) => {
                    warn!("skipping patient folder {}: {err}", folder.display());
                }
            }
        }

        let parameters = match &config.extra_parameters_file {
            Some(path) => Some(ParameterTable::load(path)?),
            None => None,
        };

        Ok(Self {
            patients,
            parameters,
        })
    }

    pub fn patients(&self) -> &[Patient] {
        &self.patients
    }

    pub fn patients_mut(&mut self) -> &mut [Patient] {
        &mut self.patients
    }

    pub fn parameters(&self) -> Option<&ParameterTable> {
        self.parameters.as_ref()
    }

    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lesionmaps_core::config::Task;
    use std::io::Write;
    use std::path::Path;

    fn touch(path: &Path, contents: &str) {
        let mut file = std::fs::File::create(path).expect("create");
        file.write_all(contents.as_bytes()).expect("write");
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
    fn loads_patients_in_sorted_order_with_sequential_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["Pat B", "pat_a"] {
            let folder = dir.path().join("in").join(name);
            fs::create_dir_all(&folder).expect("mkdir");
            touch(&folder.join("t1.nii.gz"), "x");
            touch(&folder.join("t1_label_tumor.nii.gz"), "x");
        }
        let cfg = config(dir.path());
        let cohort = Cohort::load(&cfg).expect("load");
        assert_eq!(cohort.len(), 2);
        assert_eq!(cohort.patients()[0].unique_id(), "P0_pat_b");
        assert_eq!(cohort.patients()[1].unique_id(), "P1_pat_a");
    }

    #[test]
    fn failing_patient_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let good = dir.path().join("in").join("pat_a");
        fs::create_dir_all(&good).expect("mkdir");
        touch(&good.join("t1.nii.gz"), "x");
        let bad = dir.path().join("in").join("pat_b");
        fs::create_dir_all(&bad).expect("mkdir");
        touch(&bad.join("a_label_tumor.nii.gz"), "x");
        touch(&bad.join("b_label_tumor.nii.gz"), "x");

        let cfg = config(dir.path());
        let cohort = Cohort::load(&cfg).expect("load");
        assert_eq!(cohort.len(), 1);
        assert_eq!(cohort.patients()[0].patient_id(), "pat_a");
    }

    #[test]
    fn side_table_is_attached_when_configured() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("in")).expect("mkdir");
        let params = dir.path().join("params.csv");
        touch(&params, "Patient,Volume\npat_a,10\n");

        let mut cfg = config(dir.path());
        cfg.extra_parameters_file = Some(params);
        let cohort = Cohort::load(&cfg).expect("load");
        let table = cohort.parameters().expect("table");
        assert_eq!(table.numeric("pat_a", "Volume"), Some(10.0));
    }
}
