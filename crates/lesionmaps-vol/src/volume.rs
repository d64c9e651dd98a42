//! Scalar volumes on a fixed 3-D grid, backed by NIfTI files.

use std::path::Path;

use lesionmaps_core::errors::{ErrorInfo, MapsError};
use ndarray::{Array3, Axis};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

/// A scalar volume together with the NIfTI header it was read with.
///
/// The header is kept so that derived volumes can be written back on the same
/// grid, with the same affine and spacing.
#[derive(Debug, Clone)]
pub struct Volume {
    pub data: Array3<f32>,
    pub header: NiftiHeader,
}

impl Volume {
    /// Reads a NIfTI volume from disk. A trailing singleton 4th dimension is
    /// dropped; any other dimensionality than 3 is an error.
    pub fn load(path: &Path) -> Result<Self, MapsError> {
        let object = ReaderOptions::new().read_file(path).map_err(|err| {
            MapsError::Volume(
                ErrorInfo::new("volume-read", "failed to read NIfTI volume")
                    .with_context("path", path.display().to_string())
                    .with_hint(err.to_string()),
            )
        })?;
        let header = object.header().clone();
        let data = object.into_volume().into_ndarray::<f32>().map_err(|err| {
            MapsError::Volume(
                ErrorInfo::new("volume-decode", "failed to decode NIfTI voxel data")
                    .with_context("path", path.display().to_string())
                    .with_hint(err.to_string()),
            )
        })?;
        let data = match data.ndim() {
            3 => data,
            4 if data.shape()[3] == 1 => data.index_axis_move(Axis(3), 0),
            _ => {
                return Err(MapsError::Volume(
                    ErrorInfo::new("volume-dims", "unsupported volume dimensionality")
                        .with_context("path", path.display().to_string())
                        .with_context("ndim", data.ndim().to_string()),
                ))
            }
        };
        let data = data.into_dimensionality().map_err(|err| {
            MapsError::Volume(
                ErrorInfo::new("volume-dims", "volume is not three dimensional")
                    .with_context("path", path.display().to_string())
                    .with_hint(err.to_string()),
            )
        })?;
        Ok(Self { data, header })
    }

    pub fn shape(&self) -> [usize; 3] {
        let s = self.data.shape();
        [s[0], s[1], s[2]]
    }

    /// Voxel spacing in millimetres per axis, from the header.
    pub fn spacing(&self) -> [f64; 3] {
        [
            f64::from(self.header.pixdim[1]),
            f64::from(self.header.pixdim[2]),
            f64::from(self.header.pixdim[3]),
        ]
    }

    /// Physical volume of one voxel in cubic millimetres.
    pub fn voxel_volume_mm3(&self) -> f64 {
        let [x, y, z] = self.spacing();
        x * y * z
    }

    /// Binary view of the volume: 1 where the value is nonzero.
    pub fn mask(&self) -> Array3<u8> {
        self.data.mapv(|v| u8::from(v != 0.0))
    }

    pub fn nonzero_count(&self) -> usize {
        self.data.iter().filter(|v| **v != 0.0).count()
    }
}
