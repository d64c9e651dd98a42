//! Stratified heatmap runs: bucket construction and the task driver.

use lesionmaps_cohort::{Cohort, ParameterTable};
use lesionmaps_core::config::{CategoricalStratumSpec, DenseStratumSpec, MapsConfig};
use lesionmaps_core::errors::MapsError;
use lesionmaps_vol::Volume;
use log::{info, warn};

use crate::collab::{registration_prepass, RegistrationEngine};
use crate::heatmap::{HeatmapEngine, StratumFilter};

/// One stratum: the filter plus the filesystem-safe suffix carried by every
/// artifact the stratum run writes.
#[derive(Debug, Clone, PartialEq)]
pub struct Stratum {
    pub suffix: String,
    pub filter: StratumFilter,
}

/// Expands a dense variable with thresholds `t1 < .. < tn` into n+1 strata
/// with half-open buckets: `(-inf, t1]`, `(t_{i-1}, t_i]`, `(t_n, +inf)`.
pub fn dense_strata(spec: &DenseStratumSpec) -> Vec<Stratum> {
    if spec.thresholds.is_empty() {
        return Vec::new();
    }
    let variable = &spec.variable;
    let mut strata = Vec::with_capacity(spec.thresholds.len() + 1);
    let first = spec.thresholds[0];
    strata.push(Stratum {
        suffix: format!("_{variable}_le{}", fmt_threshold(first)),
        filter: StratumFilter::Dense {
            variable: variable.clone(),
            lower: None,
            upper: Some(first),
        },
    });
    for window in spec.thresholds.windows(2) {
        strata.push(Stratum {
            suffix: format!(
                "_{variable}_{}-{}",
                fmt_threshold(window[0]),
                fmt_threshold(window[1])
            ),
            filter: StratumFilter::Dense {
                variable: variable.clone(),
                lower: Some(window[0]),
                upper: Some(window[1]),
            },
        });
    }
    let last = *spec.thresholds.last().unwrap_or(&first);
    strata.push(Stratum {
        suffix: format!("_{variable}_gt{}", fmt_threshold(last)),
        filter: StratumFilter::Dense {
            variable: variable.clone(),
            lower: Some(last),
            upper: None,
        },
    });
    strata
}

/// Expands a categorical variable into one stratum per value: the pinned
/// value when given, otherwise every distinct value observed in the
/// side-table.
pub fn categorical_strata(
    spec: &CategoricalStratumSpec,
    table: Option<&ParameterTable>,
) -> Vec<Stratum> {
    let values = match &spec.value {
        Some(value) => vec![value.clone()],
        None => table
            .map(|t| t.distinct_values(&spec.variable))
            .unwrap_or_default(),
    };
    values
        .into_iter()
        .map(|value| Stratum {
            suffix: format!("_{}-{}", spec.variable, sanitize(&value)),
            filter: StratumFilter::Categorical {
                variable: spec.variable.clone(),
                value,
            },
        })
        .collect()
}

/// Integer-valued thresholds print without a decimal point (`le10`, not
/// `le10.0`).
fn fmt_threshold(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Maps a categorical value onto a filename-safe token.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Runs the heatmap task: the unfiltered run into `Heatmaps/Overall`, then
/// one run per configured stratum into `Heatmaps/Population<suffix>`.
///
/// A failing stratum (typically no eligible patients) is logged and the
/// driver moves on; only the unfiltered run is allowed to abort the task.
pub fn run_heatmap_task(
    config: &MapsConfig,
    cohort: &mut Cohort,
    registration: Option<&dyn RegistrationEngine>,
) -> Result<(), MapsError> {
    if !config.use_registered_data {
        match registration {
            Some(engine) => registration_prepass(cohort, config, engine),
            None => {
                return Err(MapsError::Config(
                    lesionmaps_core::errors::ErrorInfo::new(
                        "config-no-registration",
                        "inputs are not registered and no registration engine is wired in",
                    ),
                ))
            }
        }
    }

    let atlas = Volume::load(&config.atlas_path)?;
    let root = config.output_folder.join("Heatmaps");

    let engine = HeatmapEngine::new(&atlas, String::new(), root.join("Overall"));
    let summary = engine.run(cohort, config, &StratumFilter::All)?;
    info!("overall heatmap run: {summary}");

    let mut strata = Vec::new();
    for spec in &config.strata.dense {
        strata.extend(dense_strata(spec));
    }
    for spec in &config.strata.categorical {
        strata.extend(categorical_strata(spec, cohort.parameters()));
    }
    for stratum in strata {
        let folder = root.join(format!("Population{}", stratum.suffix));
        let engine = HeatmapEngine::new(&atlas, stratum.suffix.clone(), folder);
        match engine.run(cohort, config, &stratum.filter) {
            Ok(summary) => info!("stratum {} run: {summary}", stratum.suffix),
            Err(err) => warn!("stratum {} skipped: {err}", stratum.suffix),
        }
    }
    Ok(())
}
