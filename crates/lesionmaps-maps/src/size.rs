//! Size and shape metrics computed from the atlas-space lesion mask.

use lesionmaps_cohort::{Patient, SizeMetrics};
use lesionmaps_core::config::MapsConfig;
use lesionmaps_core::errors::{ErrorInfo, MapsError};
use lesionmaps_vol::{ellipsoid_axes, label_components, main_component, Volume};
use log::debug;

/// Sentinel written into the shape fields when the mask holds no lesion.
const EMPTY_SHAPE_SENTINEL: f64 = -1.0;

/// Computes the size group for one patient and persists the metrics record.
///
/// Skipped without touching disk when the group is disabled or already
/// complete for the target class.
pub fn compute_size_metrics(patient: &mut Patient, config: &MapsConfig) -> Result<(), MapsError> {
    if !config.features.tumor_size {
        return Ok(());
    }
    let target_class = config.target_class();
    if patient
        .metrics(&target_class)
        .is_some_and(|m| m.size_complete())
    {
        debug!("{}: size metrics already computed", patient.patient_id());
        return Ok(());
    }

    let mask_path = patient
        .atlas_label_path(&config.gt_files_suffix, config.use_registered_data)
        .ok_or_else(|| {
            MapsError::Metrics(
                ErrorInfo::new("size-no-mask", "no atlas-space lesion mask to measure")
                    .with_patient(patient.patient_id())
                    .with_context("step", "size"),
            )
        })?;
    let volume = Volume::load(&mask_path).map_err(|err| {
        MapsError::Metrics(
            err.info()
                .clone()
                .with_patient(patient.patient_id())
                .with_context("step", "size"),
        )
    })?;

    let size = measure(&volume);
    let patient_id = patient.patient_id().to_string();
    let record = patient.metrics_mut(&target_class).ok_or_else(|| {
        MapsError::Metrics(
            ErrorInfo::new("size-no-record", "no metrics record for the target class")
                .with_patient(patient_id)
                .with_context("class", target_class.clone()),
        )
    })?;
    record.size = Some(size);
    record.save()
}

/// Measures the mask: total volume, ellipsoid axes of the main component,
/// and bounding-box diameters. An empty mask reports zero volume and the
/// sentinel in every shape field.
fn measure(volume: &Volume) -> SizeMetrics {
    let voxel_ml = volume.voxel_volume_mm3();
    let volume_ml = volume.nonzero_count() as f64 * voxel_ml * 1e-3;

    let mask = volume.mask();
    let (labels, components) = label_components(&mask);
    let Some(main) = main_component(&components) else {
        return SizeMetrics {
            volume_ml: 0.0,
            long_axis_mm: EMPTY_SHAPE_SENTINEL,
            short_axis_mm: EMPTY_SHAPE_SENTINEL,
            diameter_x_mm: EMPTY_SHAPE_SENTINEL,
            diameter_y_mm: EMPTY_SHAPE_SENTINEL,
            diameter_z_mm: EMPTY_SHAPE_SENTINEL,
        };
    };

    let spacing = volume.spacing();
    let (long_axis_mm, short_axis_mm) = ellipsoid_axes(&labels, main.label, spacing);
    let extent = main.bbox_extent();
    SizeMetrics {
        volume_ml,
        long_axis_mm,
        short_axis_mm,
        diameter_x_mm: extent[0] as f64 * spacing[0],
        diameter_y_mm: extent[1] as f64 * spacing[1],
        diameter_z_mm: extent[2] as f64 * spacing[2],
    }
}
