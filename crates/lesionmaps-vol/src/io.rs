//! Writing derived volumes back onto a reference grid.

use std::fs;
use std::path::Path;

use lesionmaps_core::errors::{ErrorInfo, MapsError};
use ndarray::Array3;
use nifti::writer::WriterOptions;
use nifti::{DataElement, NiftiHeader};

/// Writes a 3-D array as a NIfTI file carrying the reference header's grid,
/// affine, and spacing. The on-disk datatype follows the array element type;
/// a `.nii.gz` extension selects gzip compression.
pub fn save_volume<T>(
    path: &Path,
    data: &Array3<T>,
    reference: &NiftiHeader,
) -> Result<(), MapsError>
where
    T: DataElement + bytemuck::Pod,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            MapsError::Volume(
                ErrorInfo::new("volume-mkdir", "failed to create output directory")
                    .with_context("path", parent.display().to_string())
                    .with_hint(err.to_string()),
            )
        })?;
    }
    WriterOptions::new(path)
        .reference_header(reference)
        .write_nifti(data)
        .map_err(|err| {
            MapsError::Volume(
                ErrorInfo::new("volume-write", "failed to write NIfTI volume")
                    .with_context("path", path.display().to_string())
                    .with_hint(err.to_string()),
            )
        })
}
