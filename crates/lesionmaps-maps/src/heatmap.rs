//! Atlas-space accumulation engine.
//!
//! One engine run owns four same-shaped accumulators on the atlas grid plus a
//! provenance volume, scans the cohort once, and writes five NIfTI outputs
//! and a provenance look-up table into its output folder.

use std::path::PathBuf;

use csv::WriterBuilder;
use lesionmaps_cohort::{Cohort, ParameterTable};
use lesionmaps_core::config::MapsConfig;
use lesionmaps_core::errors::{ErrorInfo, MapsError};
use lesionmaps_vol::{label_components, save_volume, Volume};
use log::{info, warn};
use ndarray::Array3;

use crate::outcome::{RunSummary, ScanOutcome, SkipReason};

/// Half-extent of the cube stamped around each component centroid.
const CENTROID_CUBE_RADIUS: i64 = 3;
/// Components below this physical volume are excluded from the centroid map.
const CENTROID_MIN_VOLUME_ML: f64 = 0.1;

/// Patient admission rule for one accumulation run.
#[derive(Debug, Clone, PartialEq)]
pub enum StratumFilter {
    /// Every patient is admitted.
    All,
    /// Admits patients whose side-table value falls in `(lower, upper]`
    /// (`None` bounds are open towards infinity).
    Dense {
        variable: String,
        lower: Option<f64>,
        upper: Option<f64>,
    },
    /// Admits patients whose side-table value equals `value` exactly.
    Categorical { variable: String, value: String },
}

impl StratumFilter {
    /// Whether the patient is admitted. Patients missing from the side-table,
    /// missing the variable, or carrying a non-numeric value for a dense
    /// variable are rejected.
    pub fn accepts(&self, patient_id: &str, table: Option<&ParameterTable>) -> bool {
        match self {
            StratumFilter::All => true,
            StratumFilter::Dense {
                variable,
                lower,
                upper,
            } => {
                let Some(value) = table.and_then(|t| t.numeric(patient_id, variable)) else {
                    return false;
                };
                lower.map_or(true, |lo| value > lo) && upper.map_or(true, |hi| value <= hi)
            }
            StratumFilter::Categorical { variable, value } => table
                .and_then(|t| t.value(patient_id, variable))
                .is_some_and(|v| v == value.as_str()),
        }
    }
}

/// One accumulation run over the cohort, bound to an output folder and a
/// filename suffix.
pub struct HeatmapEngine<'a> {
    atlas: &'a Volume,
    suffix: String,
    output_folder: PathBuf,
}

impl<'a> HeatmapEngine<'a> {
    pub fn new(atlas: &'a Volume, suffix: String, output_folder: PathBuf) -> Self {
        Self {
            atlas,
            suffix,
            output_folder,
        }
    }

    /// Scans every patient once and writes the accumulated maps.
    ///
    /// Fails when no patient was counted; individual skips and failures are
    /// tallied in the returned summary.
    pub fn run(
        &self,
        cohort: &Cohort,
        config: &MapsConfig,
        filter: &StratumFilter,
    ) -> Result<RunSummary, MapsError> {
        let shape = self.atlas.shape();
        let dim = (shape[0], shape[1], shape[2]);
        let mut presence = Array3::<u32>::zeros(dim);
        let mut centroids = Array3::<u32>::zeros(dim);
        let mut provenance = Array3::<u16>::zeros(dim);
        let mut lut: Vec<(u16, String)> = Vec::new();
        let mut summary = RunSummary::default();

        for patient in cohort.patients() {
            let outcome = self.scan_patient(
                patient,
                cohort.parameters(),
                config,
                filter,
                &mut presence,
                &mut centroids,
                &mut provenance,
                &mut lut,
            );
            summary.record(patient.patient_id(), outcome);
        }

        let counted = summary.counted();
        if counted == 0 {
            return Err(MapsError::Heatmap(
                ErrorInfo::new("heatmap-empty-run", "no eligible patients in this run")
                    .with_context("output", self.output_folder.display().to_string()),
            ));
        }

        let presence_u16 = presence.mapv(|v| v.min(u32::from(u16::MAX)) as u16);
        let centroids_u16 = centroids.mapv(|v| v.min(u32::from(u16::MAX)) as u16);
        let presence_pct = presence.mapv(|v| v as f32 / counted as f32);
        let centroids_pct = centroids.mapv(|v| v as f32 / counted as f32);

        let header = &self.atlas.header;
        save_volume(&self.output_file("heatmap_cumulative"), &presence_u16, header)?;
        save_volume(&self.output_file("heatmap_percentages"), &presence_pct, header)?;
        save_volume(
            &self.output_file("heatmap_centroids_cumulative"),
            &centroids_u16,
            header,
        )?;
        save_volume(
            &self.output_file("heatmap_centroids_percentages"),
            &centroids_pct,
            header,
        )?;
        save_volume(&self.output_file("heatmap_patient_ids"), &provenance, header)?;
        self.write_lut(&lut)?;

        info!(
            "heatmap run {} done: {summary}",
            self.output_folder.display()
        );
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_patient(
        &self,
        patient: &lesionmaps_cohort::Patient,
        table: Option<&ParameterTable>,
        config: &MapsConfig,
        filter: &StratumFilter,
        presence: &mut Array3<u32>,
        centroids: &mut Array3<u32>,
        provenance: &mut Array3<u16>,
        lut: &mut Vec<(u16, String)>,
    ) -> ScanOutcome {
        if !filter.accepts(patient.patient_id(), table) {
            return ScanOutcome::Skipped(SkipReason::FilterRejected);
        }
        let Some(mask_path) =
            patient.atlas_label_path(&config.gt_files_suffix, config.use_registered_data)
        else {
            return ScanOutcome::Skipped(SkipReason::MissingMask);
        };
        let volume = match Volume::load(&mask_path) {
            Ok(volume) => volume,
            Err(err) => {
                warn!("{}: {err}", patient.patient_id());
                return ScanOutcome::Skipped(SkipReason::UnreadableMask);
            }
        };
        if volume.shape() != self.atlas.shape() {
            return ScanOutcome::Skipped(SkipReason::ShapeMismatch);
        }
        let mask = volume.mask();
        if mask.iter().all(|&v| v == 0) {
            return ScanOutcome::Skipped(SkipReason::EmptyMask);
        }

        for (voxel, &v) in mask.indexed_iter() {
            if v != 0 {
                presence[voxel] += 1;
            }
        }

        let patient_index = (lut.len() + 1) as u16;
        let voxel_ml = volume.voxel_volume_mm3();
        let (_, components) = label_components(&mask);
        for component in &components {
            if component.volume_ml(voxel_ml) < CENTROID_MIN_VOLUME_ML {
                continue;
            }
            self.stamp_cube(component.centroid, patient_index, centroids, provenance);
        }
        lut.push((patient_index, patient.patient_id().to_string()));
        ScanOutcome::Counted
    }

    /// Adds one to every centroid-map voxel of the cube around `centroid`,
    /// clamped to the grid, and claims unowned provenance voxels.
    fn stamp_cube(
        &self,
        centroid: [f64; 3],
        patient_index: u16,
        centroids: &mut Array3<u32>,
        provenance: &mut Array3<u16>,
    ) {
        let shape = self.atlas.shape();
        let center: Vec<i64> = centroid.iter().map(|c| c.round() as i64).collect();
        for x in center[0] - CENTROID_CUBE_RADIUS..=center[0] + CENTROID_CUBE_RADIUS {
            for y in center[1] - CENTROID_CUBE_RADIUS..=center[1] + CENTROID_CUBE_RADIUS {
                for z in center[2] - CENTROID_CUBE_RADIUS..=center[2] + CENTROID_CUBE_RADIUS {
                    if x < 0
                        || y < 0
                        || z < 0
                        || x as usize >= shape[0]
                        || y as usize >= shape[1]
                        || z as usize >= shape[2]
                    {
                        continue;
                    }
                    let voxel = [x as usize, y as usize, z as usize];
                    centroids[voxel] += 1;
                    // First writer wins: an already-claimed voxel keeps its owner.
                    if provenance[voxel] == 0 {
                        provenance[voxel] = patient_index;
                    }
                }
            }
        }
    }

    fn output_file(&self, stem: &str) -> PathBuf {
        self.output_folder
            .join(format!("{stem}{}.nii.gz", self.suffix))
    }

    /// Writes the provenance index to patient id mapping for this run.
    fn write_lut(&self, lut: &[(u16, String)]) -> Result<(), MapsError> {
        let path = self.output_folder.join("patient_ids_lut.csv");
        let mut writer = WriterBuilder::new().from_path(&path).map_err(|err| {
            MapsError::Heatmap(
                ErrorInfo::new("heatmap-lut", "failed to write provenance look-up table")
                    .with_context("path", path.display().to_string())
                    .with_hint(err.to_string()),
            )
        })?;
        let write_err = |err: csv::Error| {
            MapsError::Heatmap(
                ErrorInfo::new("heatmap-lut", "failed to write provenance look-up table")
                    .with_context("path", path.display().to_string())
                    .with_hint(err.to_string()),
            )
        };
        writer.write_record(["Index", "Patient"]).map_err(write_err)?;
        for (index, patient_id) in lut {
            writer
                .write_record([index.to_string(), patient_id.clone()])
                .map_err(write_err)?;
        }
        writer.flush().map_err(|err| write_err(err.into()))?;
        Ok(())
    }
}
