//! Run configuration for the lesionmaps pipeline.
//!
//! The configuration is deserialized once (YAML at the CLI level) and passed
//! by reference into every component; no global state is involved.

use std::path::PathBuf;
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::{ErrorInfo, MapsError};

/// Task selector for a pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    /// Cohort-level heatmap accumulation plus stratified reruns.
    Heatmap,
    /// Per-patient size/location metrics plus the cohort-wide merge.
    Metrics,
}

/// Parameters governing a full pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapsConfig {
    /// Task to perform.
    pub task: Task,
    /// Cohort root folder, one subfolder per patient.
    pub input_folder: PathBuf,
    /// Root folder for all generated artifacts.
    pub output_folder: PathBuf,
    /// Reference atlas volume defining the common grid.
    pub atlas_path: PathBuf,
    /// Filename suffix identifying the lesion mask inside a patient folder.
    #[serde(default = "default_gt_suffix")]
    pub gt_files_suffix: String,
    /// Acquisition sequence label used when staging collaborator inputs.
    #[serde(default = "default_sequence_type")]
    pub sequence_type: String,
    /// When set, input volumes are assumed to already live in atlas space.
    #[serde(default)]
    pub use_registered_data: bool,
    /// Optional clinical side-table (patient id column plus arbitrary columns).
    #[serde(default)]
    pub extra_parameters_file: Option<PathBuf>,
    /// Stratification specification for heatmap reruns.
    #[serde(default)]
    pub strata: StrataConfig,
    /// Which metric groups the metrics task computes.
    #[serde(default)]
    pub features: FeatureSelection,
    /// Executable invoked as the anatomical inference collaborator.
    #[serde(default)]
    pub inference_command: Option<PathBuf>,
}

fn default_gt_suffix() -> String {
    "label_tumor.nii.gz".to_string()
}

fn default_sequence_type() -> String {
    "T1-CE".to_string()
}

impl MapsConfig {
    /// Semantic label of the object the lesion mask represents, derived from
    /// the configured mask suffix (`label_tumor.nii.gz` -> `tumor`).
    pub fn target_class(&self) -> String {
        let stem = self
            .gt_files_suffix
            .split('.')
            .next()
            .unwrap_or(self.gt_files_suffix.as_str());
        stem.rsplit("label_").next().unwrap_or(stem).to_string()
    }

    /// Basename prefix used when staging volumes for the inference
    /// collaborator. `T1-CE` keeps its historical `t1gd` alias.
    pub fn sequence_prefix(&self) -> String {
        if self.sequence_type == "T1-CE" {
            "t1gd".to_string()
        } else {
            self.sequence_type.clone()
        }
    }

    /// Validates cross-field consistency before a run starts.
    pub fn validate(&self) -> Result<(), MapsError> {
        if self.gt_files_suffix.trim().is_empty() {
            return Err(MapsError::Config(ErrorInfo::new(
                "config-empty-suffix",
                "the lesion mask filename suffix must not be empty",
            )));
        }
        for spec in &self.strata.dense {
            if spec.thresholds.is_empty() {
                return Err(MapsError::Config(
                    ErrorInfo::new(
                        "config-empty-thresholds",
                        "dense stratification requires at least one threshold",
                    )
                    .with_context("variable", spec.variable.clone()),
                ));
            }
            if spec.thresholds.windows(2).any(|w| w[0] >= w[1]) {
                return Err(MapsError::Config(
                    ErrorInfo::new(
                        "config-unsorted-thresholds",
                        "dense stratification thresholds must be strictly increasing",
                    )
                    .with_context("variable", spec.variable.clone()),
                ));
            }
        }
        if (!self.strata.dense.is_empty() || !self.strata.categorical.is_empty())
            && self.extra_parameters_file.is_none()
        {
            return Err(MapsError::Config(ErrorInfo::new(
                "config-missing-parameters",
                "stratification requires an extra parameters side-table",
            )));
        }
        Ok(())
    }
}

/// Stratification variables for the heatmap task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Continuous variables split at the given thresholds.
    #[serde(default)]
    pub dense: Vec<DenseStratumSpec>,
    /// Categorical variables split by exact value.
    #[serde(default)]
    pub categorical: Vec<CategoricalStratumSpec>,
}

/// One continuous stratification variable with its ordered thresholds.
///
/// Deserializes from the structured form or the compact
/// `variable,t1-t2-...-tn` string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DenseStratumSpec {
    pub variable: String,
    pub thresholds: Vec<f64>,
}

impl<'de> Deserialize<'de> for DenseStratumSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Compact(String),
            Full {
                variable: String,
                thresholds: Vec<f64>,
            },
        }
        match Repr::deserialize(deserializer)? {
            Repr::Compact(spec) => spec.parse().map_err(D::Error::custom),
            Repr::Full {
                variable,
                thresholds,
            } => Ok(Self {
                variable,
                thresholds,
            }),
        }
    }
}

impl FromStr for DenseStratumSpec {
    type Err = MapsError;

    /// Parses the compact `variable,t1-t2-...-tn` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (variable, raw) = s.split_once(',').ok_or_else(|| {
            MapsError::Config(
                ErrorInfo::new("config-dense-spec", "expected `variable,t1-t2-...-tn`")
                    .with_context("spec", s),
            )
        })?;
        let mut thresholds = Vec::new();
        for part in raw.split('-') {
            let value = part.trim().parse::<f64>().map_err(|err| {
                MapsError::Config(
                    ErrorInfo::new("config-dense-threshold", "threshold is not numeric")
                        .with_context("spec", s)
                        .with_hint(err.to_string()),
                )
            })?;
            thresholds.push(value);
        }
        Ok(Self {
            variable: variable.trim().to_string(),
            thresholds,
        })
    }
}

/// One categorical stratification variable, optionally pinned to a value.
///
/// Deserializes from the structured form or the compact `variable,value`
/// string (empty value enumerates).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoricalStratumSpec {
    pub variable: String,
    /// `None` enumerates every distinct observed value.
    pub value: Option<String>,
}

impl<'de> Deserialize<'de> for CategoricalStratumSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Compact(String),
            Full {
                variable: String,
                #[serde(default)]
                value: Option<String>,
            },
        }
        match Repr::deserialize(deserializer)? {
            Repr::Compact(spec) => spec.parse().map_err(D::Error::custom),
            Repr::Full { variable, value } => Ok(Self { variable, value }),
        }
    }
}

impl FromStr for CategoricalStratumSpec {
    type Err = MapsError;

    /// Parses the compact `variable,value` form; an empty value enumerates.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (variable, value) = s.split_once(',').ok_or_else(|| {
            MapsError::Config(
                ErrorInfo::new("config-categorical-spec", "expected `variable,value-or-empty`")
                    .with_context("spec", s),
            )
        })?;
        let value = value.trim();
        Ok(Self {
            variable: variable.trim().to_string(),
            value: if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            },
        })
    }
}

/// Which metric groups the metrics task computes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSelection {
    /// Connected-component size and shape metrics.
    #[serde(default = "default_true")]
    pub tumor_size: bool,
    /// Laterality percentages and midline crossing.
    #[serde(default)]
    pub brain_location: bool,
    /// Multifocality flag, part count, and max inter-part distance.
    #[serde(default)]
    pub multifocality: bool,
    /// Cortical atlases to compute structure overlaps against.
    #[serde(default)]
    pub cortical_atlases: Vec<String>,
    /// Subcortical atlases to compute structure overlaps against.
    #[serde(default)]
    pub subcortical_atlases: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for FeatureSelection {
    fn default() -> Self {
        Self {
            tumor_size: true,
            brain_location: false,
            multifocality: false,
            cortical_atlases: Vec::new(),
            subcortical_atlases: Vec::new(),
        }
    }
}

impl FeatureSelection {
    /// True when any group requiring the inference collaborator is requested.
    pub fn any_location(&self) -> bool {
        self.brain_location
            || self.multifocality
            || !self.cortical_atlases.is_empty()
            || !self.subcortical_atlases.is_empty()
    }
}
