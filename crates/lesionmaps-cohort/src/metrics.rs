//! Per-patient, per-target-class metric record.
//!
//! A record holds up to five metric groups and is persisted as one flattened
//! CSV row (`computed_metrics_<class>.csv` in the patient output folder).
//! Group completeness is decided once, at load or fill time, against the
//! configured feature lists; callers only inspect the resulting flags.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use lesionmaps_core::config::FeatureSelection;
use lesionmaps_core::errors::{ErrorInfo, MapsError};

pub const COL_VOLUME: &str = "Volume (ml)";
pub const COL_LONG_AXIS: &str = "Long-axis diameter (mm)";
pub const COL_SHORT_AXIS: &str = "Short-axis diameter (mm)";
pub const COL_DIAMETER_X: &str = "Diameter X (mm)";
pub const COL_DIAMETER_Y: &str = "Diameter Y (mm)";
pub const COL_DIAMETER_Z: &str = "Diameter Z (mm)";
pub const COL_LEFT_LATERALITY: &str = "Left laterality (%)";
pub const COL_RIGHT_LATERALITY: &str = "Right laterality (%)";
pub const COL_MIDLINE_CROSSING: &str = "Midline crossing";
pub const COL_MULTIFOCALITY: &str = "Multifocality";
pub const COL_PARTS: &str = "Tumor parts nb";
pub const COL_MULTIFOCAL_DISTANCE: &str = "Multifocal distance (mm)";

/// Connected-component size and shape metrics. Shape fields are −1 when the
/// mask is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeMetrics {
    pub volume_ml: f64,
    pub long_axis_mm: f64,
    pub short_axis_mm: f64,
    pub diameter_x_mm: f64,
    pub diameter_y_mm: f64,
    pub diameter_z_mm: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrainLocationMetrics {
    pub left_laterality_pct: f64,
    pub right_laterality_pct: f64,
    pub midline_crossing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultifocalityMetrics {
    pub multifocal: bool,
    pub parts: u64,
    pub max_distance_mm: f64,
}

/// Per-atlas structure overlap fractions (atlas -> structure -> fraction).
pub type AtlasOverlaps = BTreeMap<String, BTreeMap<String, f64>>;

#[derive(Debug, Clone)]
pub struct Metrics {
    uid: String,
    filepath: PathBuf,
    pub size: Option<SizeMetrics>,
    pub brain_location: Option<BrainLocationMetrics>,
    pub multifocality: Option<MultifocalityMetrics>,
    pub cortical: AtlasOverlaps,
    pub subcortical: AtlasOverlaps,
}

impl Metrics {
    /// Creates a record bound to `<folder>/computed_metrics_<class>.csv`,
    /// reloading any groups already persisted there.
    pub fn open(
        uid: String,
        folder: &Path,
        target_class: &str,
        features: &FeatureSelection,
    ) -> Result<Self, MapsError> {
        let filepath = folder.join(format!("computed_metrics_{target_class}.csv"));
        let mut metrics = Self {
            uid,
            filepath,
            size: None,
            brain_location: None,
            multifocality: None,
            cortical: AtlasOverlaps::new(),
            subcortical: AtlasOverlaps::new(),
        };
        if metrics.filepath.exists() {
            metrics.load_row(features)?;
        }
        Ok(metrics)
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn filepath(&self) -> &Path {
        &self.filepath
    }

    pub fn size_complete(&self) -> bool {
        self.size.is_some()
    }

    pub fn brain_location_complete(&self) -> bool {
        self.brain_location.is_some()
    }

    pub fn multifocality_complete(&self) -> bool {
        self.multifocality.is_some()
    }

    pub fn cortical_complete(&self, atlases: &[String]) -> bool {
        atlases.iter().all(|a| self.cortical.contains_key(a))
    }

    pub fn subcortical_complete(&self, atlases: &[String]) -> bool {
        atlases.iter().all(|a| self.subcortical.contains_key(a))
    }

    /// True when every location group requested by the feature selection is
    /// already populated.
    pub fn location_complete(&self, features: &FeatureSelection) -> bool {
        (!features.brain_location || self.brain_location_complete())
            && (!features.multifocality || self.multifocality_complete())
            && self.cortical_complete(&features.cortical_atlases)
            && self.subcortical_complete(&features.subcortical_atlases)
    }

    /// Persists the record as one flattened row. Nested atlas entries are
    /// written as `<atlas>_<structure>` columns.
    pub fn save(&self) -> Result<(), MapsError> {
        if let Some(parent) = self.filepath.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                MapsError::Metrics(
                    ErrorInfo::new("metrics-mkdir", "failed to create metrics directory")
                        .with_context("path", parent.display().to_string())
                        .with_hint(err.to_string()),
                )
            })?;
        }
        let mut columns = Vec::new();
        let mut values = Vec::new();
        if let Some(size) = &self.size {
            columns.extend([
                COL_VOLUME,
                COL_LONG_AXIS,
                COL_SHORT_AXIS,
                COL_DIAMETER_X,
                COL_DIAMETER_Y,
                COL_DIAMETER_Z,
            ]);
            values.extend([
                size.volume_ml.to_string(),
                size.long_axis_mm.to_string(),
                size.short_axis_mm.to_string(),
                size.diameter_x_mm.to_string(),
                size.diameter_y_mm.to_string(),
                size.diameter_z_mm.to_string(),
            ]);
        }
        if let Some(brain) = &self.brain_location {
            columns.extend([COL_LEFT_LATERALITY, COL_RIGHT_LATERALITY, COL_MIDLINE_CROSSING]);
            values.extend([
                brain.left_laterality_pct.to_string(),
                brain.right_laterality_pct.to_string(),
                brain.midline_crossing.to_string(),
            ]);
        }
        if let Some(multi) = &self.multifocality {
            columns.extend([COL_MULTIFOCALITY, COL_PARTS, COL_MULTIFOCAL_DISTANCE]);
            values.extend([
                multi.multifocal.to_string(),
                multi.parts.to_string(),
                multi.max_distance_mm.to_string(),
            ]);
        }
        let mut prefixed = Vec::new();
        for overlaps in [&self.cortical, &self.subcortical] {
            for (atlas, structures) in overlaps {
                for (structure, fraction) in structures {
                    prefixed.push(format!("{atlas}_{structure}"));
                    values.push(fraction.to_string());
                }
            }
        }

        let mut writer = WriterBuilder::new()
            .from_path(&self.filepath)
            .map_err(|err| wrap_csv("metrics-open", &self.filepath, err))?;
        let header: Vec<&str> = columns
            .iter()
            .copied()
            .chain(prefixed.iter().map(String::as_str))
            .collect();
        writer
            .write_record(&header)
            .map_err(|err| wrap_csv("metrics-write-header", &self.filepath, err))?;
        writer
            .write_record(&values)
            .map_err(|err| wrap_csv("metrics-write-row", &self.filepath, err))?;
        writer
            .flush()
            .map_err(|err| wrap_csv("metrics-flush", &self.filepath, err.into()))?;
        Ok(())
    }

    fn load_row(&mut self, features: &FeatureSelection) -> Result<(), MapsError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.filepath)
            .map_err(|err| wrap_csv("metrics-read", &self.filepath, err))?;
        let header = reader
            .headers()
            .map_err(|err| wrap_csv("metrics-read-header", &self.filepath, err))?
            .clone();
        let Some(record) = reader.records().next() else {
            return Ok(());
        };
        let record = record.map_err(|err| wrap_csv("metrics-read-row", &self.filepath, err))?;
        let row = Row {
            header: &header,
            record: &record,
        };

        self.size = (|| {
            Some(SizeMetrics {
                volume_ml: row.number(COL_VOLUME)?,
                long_axis_mm: row.number(COL_LONG_AXIS)?,
                short_axis_mm: row.number(COL_SHORT_AXIS)?,
                diameter_x_mm: row.number(COL_DIAMETER_X)?,
                diameter_y_mm: row.number(COL_DIAMETER_Y)?,
                diameter_z_mm: row.number(COL_DIAMETER_Z)?,
            })
        })();
        self.brain_location = (|| {
            Some(BrainLocationMetrics {
                left_laterality_pct: row.number(COL_LEFT_LATERALITY)?,
                right_laterality_pct: row.number(COL_RIGHT_LATERALITY)?,
                midline_crossing: row.boolean(COL_MIDLINE_CROSSING)?,
            })
        })();
        self.multifocality = (|| {
            Some(MultifocalityMetrics {
                multifocal: row.boolean(COL_MULTIFOCALITY)?,
                parts: row.number(COL_PARTS)? as u64,
                max_distance_mm: row.number(COL_MULTIFOCAL_DISTANCE)?,
            })
        })();
        self.cortical = row.atlas_overlaps(&features.cortical_atlases);
        self.subcortical = row.atlas_overlaps(&features.subcortical_atlases);
        Ok(())
    }
}

struct Row<'a> {
    header: &'a StringRecord,
    record: &'a StringRecord,
}

impl Row<'_> {
    fn cell(&self, column: &str) -> Option<&str> {
        let idx = self.header.iter().position(|c| c == column)?;
        self.record.get(idx)
    }

    fn number(&self, column: &str) -> Option<f64> {
        self.cell(column)?.trim().parse::<f64>().ok()
    }

    fn boolean(&self, column: &str) -> Option<bool> {
        match self.cell(column)?.trim().to_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }

    /// Collects `<atlas>_<structure>` columns for the given atlas names.
    fn atlas_overlaps(&self, atlases: &[String]) -> AtlasOverlaps {
        let mut result = AtlasOverlaps::new();
        for atlas in atlases {
            let prefix = format!("{atlas}_");
            for (column, value) in self.header.iter().zip(self.record.iter()) {
                if let Some(structure) = column.strip_prefix(&prefix) {
                    if let Ok(fraction) = value.trim().parse::<f64>() {
                        result
                            .entry(atlas.clone())
                            .or_default()
                            .insert(structure.to_string(), fraction);
                    }
                }
            }
        }
        result
    }
}

fn wrap_csv(code: &str, path: &Path, err: csv::Error) -> MapsError {
    MapsError::Metrics(
        ErrorInfo::new(code, "metrics table failure")
            .with_context("path", path.display().to_string())
            .with_hint(err.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features_with_atlases() -> FeatureSelection {
        FeatureSelection {
            tumor_size: true,
            brain_location: true,
            multifocality: true,
            cortical_atlases: vec!["MNI".to_string()],
            subcortical_atlases: vec!["BCB".to_string()],
        }
    }

    #[test]
    fn roundtrip_preserves_all_groups() {
        let dir = tempfile::tempdir().expect("tempdir");
        let features = features_with_atlases();
        let mut metrics =
            Metrics::open("M0".to_string(), dir.path(), "tumor", &features).expect("open");
        metrics.size = Some(SizeMetrics {
            volume_ml: 12.5,
            long_axis_mm: 31.0,
            short_axis_mm: 10.0,
            diameter_x_mm: 20.0,
            diameter_y_mm: 18.0,
            diameter_z_mm: 25.0,
        });
        metrics.brain_location = Some(BrainLocationMetrics {
            left_laterality_pct: 93.5,
            right_laterality_pct: 6.5,
            midline_crossing: false,
        });
        metrics.multifocality = Some(MultifocalityMetrics {
            multifocal: true,
            parts: 2,
            max_distance_mm: 41.2,
        });
        metrics
            .cortical
            .entry("MNI".to_string())
            .or_default()
            .insert("Frontal".to_string(), 0.72);
        metrics
            .subcortical
            .entry("BCB".to_string())
            .or_default()
            .insert("Tract_A".to_string(), 0.11);
        metrics.save().expect("save");

        let reloaded =
            Metrics::open("M1".to_string(), dir.path(), "tumor", &features).expect("reload");
        assert!(reloaded.size_complete());
        assert!(reloaded.location_complete(&features));
        assert_eq!(reloaded.size, metrics.size);
        assert_eq!(reloaded.brain_location, metrics.brain_location);
        assert_eq!(reloaded.multifocality, metrics.multifocality);
        assert!((reloaded.cortical["MNI"]["Frontal"] - 0.72).abs() < 1e-9);
        assert!((reloaded.subcortical["BCB"]["Tract_A"] - 0.11).abs() < 1e-9);
    }

    #[test]
    fn partial_row_leaves_missing_groups_incomplete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let features = features_with_atlases();
        let mut metrics =
            Metrics::open("M0".to_string(), dir.path(), "tumor", &features).expect("open");
        metrics.size = Some(SizeMetrics {
            volume_ml: 1.0,
            long_axis_mm: 2.0,
            short_axis_mm: 1.0,
            diameter_x_mm: 1.0,
            diameter_y_mm: 1.0,
            diameter_z_mm: 1.0,
        });
        metrics.save().expect("save");

        let reloaded =
            Metrics::open("M1".to_string(), dir.path(), "tumor", &features).expect("reload");
        assert!(reloaded.size_complete());
        assert!(!reloaded.brain_location_complete());
        assert!(!reloaded.location_complete(&features));
        assert!(!reloaded.cortical_complete(&features.cortical_atlases));
    }

    #[test]
    fn missing_file_yields_empty_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let features = FeatureSelection::default();
        let metrics =
            Metrics::open("M0".to_string(), dir.path(), "tumor", &features).expect("open");
        assert!(!metrics.size_complete());
        // Location is trivially complete when nothing location-related is requested.
        assert!(metrics.location_complete(&features));
    }
}
