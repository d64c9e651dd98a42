//! Scratch folders for collaborator exchanges, removed on drop.

use std::fs;
use std::path::{Path, PathBuf};

use lesionmaps_core::errors::{ErrorInfo, MapsError};
use log::warn;

/// Paired `pipeline_input` / `pipeline_output` folders under the output root.
///
/// Both folders are created empty (pre-existing leftovers are wiped) and
/// removed when the guard drops, whether the step succeeded or not.
#[derive(Debug)]
pub struct Scratch {
    input: PathBuf,
    output: PathBuf,
}

impl Scratch {
    pub fn create(output_root: &Path) -> Result<Self, MapsError> {
        let input = output_root.join("pipeline_input");
        let output = output_root.join("pipeline_output");
        for folder in [&input, &output] {
            if folder.exists() {
                fs::remove_dir_all(folder).map_err(|err| scratch_error(folder, err))?;
            }
            fs::create_dir_all(folder).map_err(|err| scratch_error(folder, err))?;
        }
        Ok(Self { input, output })
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        for folder in [&self.input, &self.output] {
            if let Err(err) = fs::remove_dir_all(folder) {
                if folder.exists() {
                    warn!("failed to remove scratch folder {}: {err}", folder.display());
                }
            }
        }
    }
}

fn scratch_error(folder: &Path, err: std::io::Error) -> MapsError {
    MapsError::Metrics(
        ErrorInfo::new("scratch-setup", "failed to prepare scratch folder")
            .with_context("path", folder.display().to_string())
            .with_hint(err.to_string()),
    )
}
