//! Persisted registration transforms between two named spaces.
//!
//! Transform files live under `<patient output>/Transforms/<moving>-to-<fixed>/`
//! with a `forward_` or `inverse_` basename prefix. An existing pair folder is
//! treated as a completed cache and inventoried instead of rebuilt.

use std::fs;
use std::path::{Path, PathBuf};

use lesionmaps_core::errors::{ErrorInfo, MapsError};

pub const TRANSFORMS_DIR: &str = "Transforms";
const FORWARD_PREFIX: &str = "forward_";
const INVERSE_PREFIX: &str = "inverse_";

/// Forward and inverse transform files between a fixed and a moving space.
#[derive(Debug, Clone)]
pub struct Registration {
    uid: String,
    fixed_space: String,
    moving_space: String,
    folder: PathBuf,
    forward_transforms: Vec<PathBuf>,
    inverse_transforms: Vec<PathBuf>,
}

impl Registration {
    /// Persists freshly computed transform files into the pair folder,
    /// prefixing each basename with its direction.
    pub fn create(
        uid: String,
        patient_output: &Path,
        fixed_space: &str,
        moving_space: &str,
        forward: &[PathBuf],
        inverse: &[PathBuf],
    ) -> Result<Self, MapsError> {
        let folder = pair_folder(patient_output, fixed_space, moving_space);
        fs::create_dir_all(&folder).map_err(|err| {
            MapsError::Cohort(
                ErrorInfo::new("registration-mkdir", "failed to create transforms folder")
                    .with_context("path", folder.display().to_string())
                    .with_hint(err.to_string()),
            )
        })?;
        let forward_transforms = copy_prefixed(&folder, FORWARD_PREFIX, forward)?;
        let inverse_transforms = copy_prefixed(&folder, INVERSE_PREFIX, inverse)?;
        Ok(Self {
            uid,
            fixed_space: fixed_space.to_string(),
            moving_space: moving_space.to_string(),
            folder,
            forward_transforms,
            inverse_transforms,
        })
    }

    /// Reloads an already-persisted registration when its pair folder exists.
    pub fn open_cached(
        uid: String,
        patient_output: &Path,
        fixed_space: &str,
        moving_space: &str,
    ) -> Result<Option<Self>, MapsError> {
        let folder = pair_folder(patient_output, fixed_space, moving_space);
        if !folder.is_dir() {
            return Ok(None);
        }
        let mut forward_transforms = Vec::new();
        let mut inverse_transforms = Vec::new();
        let entries = fs::read_dir(&folder).map_err(|err| {
            MapsError::Cohort(
                ErrorInfo::new("registration-scan", "failed to inventory transforms folder")
                    .with_context("path", folder.display().to_string())
                    .with_hint(err.to_string()),
            )
        })?;
        for entry in entries {
            let entry = entry.map_err(|err| {
                MapsError::Cohort(
                    ErrorInfo::new("registration-scan", "failed to inventory transforms folder")
                        .with_context("path", folder.display().to_string())
                        .with_hint(err.to_string()),
                )
            })?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(FORWARD_PREFIX) {
                forward_transforms.push(entry.path());
            } else if name.starts_with(INVERSE_PREFIX) {
                inverse_transforms.push(entry.path());
            }
        }
        forward_transforms.sort();
        inverse_transforms.sort();
        Ok(Some(Self {
            uid,
            fixed_space: fixed_space.to_string(),
            moving_space: moving_space.to_string(),
            folder,
            forward_transforms,
            inverse_transforms,
        }))
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn fixed_space(&self) -> &str {
        &self.fixed_space
    }

    pub fn moving_space(&self) -> &str {
        &self.moving_space
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn forward_transforms(&self) -> &[PathBuf] {
        &self.forward_transforms
    }

    pub fn inverse_transforms(&self) -> &[PathBuf] {
        &self.inverse_transforms
    }
}

fn pair_folder(patient_output: &Path, fixed_space: &str, moving_space: &str) -> PathBuf {
    patient_output
        .join(TRANSFORMS_DIR)
        .join(format!("{moving_space}-to-{fixed_space}"))
}

fn copy_prefixed(
    folder: &Path,
    prefix: &str,
    sources: &[PathBuf],
) -> Result<Vec<PathBuf>, MapsError> {
    let mut copied = Vec::with_capacity(sources.len());
    for source in sources {
        let basename = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                MapsError::Cohort(
                    ErrorInfo::new("registration-basename", "transform file has no basename")
                        .with_context("path", source.display().to_string()),
                )
            })?;
        let target = folder.join(format!("{prefix}{basename}"));
        fs::copy(source, &target).map_err(|err| {
            MapsError::Cohort(
                ErrorInfo::new("registration-copy", "failed to persist transform file")
                    .with_context("source", source.display().to_string())
                    .with_context("target", target.display().to_string())
                    .with_hint(err.to_string()),
            )
        })?;
        copied.push(target);
    }
    Ok(copied)
}
