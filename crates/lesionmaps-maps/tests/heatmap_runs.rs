//! End-to-end accumulation runs over small synthetic cohorts.

use std::fs;
use std::path::{Path, PathBuf};

use lesionmaps_cohort::Cohort;
use lesionmaps_core::config::{MapsConfig, Task};
use lesionmaps_maps::{run_heatmap_task, HeatmapEngine, StratumFilter};
use lesionmaps_vol::{save_volume, Volume};
use ndarray::Array3;
use nifti::NiftiHeader;

const SHAPE: (usize, usize, usize) = (24, 24, 24);

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

fn write_atlas(path: &Path) {
    let data = Array3::<f32>::zeros(SHAPE);
    save_volume(path, &data, &NiftiHeader::default()).expect("atlas");
}

/// Writes a patient folder with a primary volume and a lesion mask holding
/// the given cubes (`corner`, `size` in voxels).
fn write_patient(root: &Path, name: &str, cubes: &[([usize; 3], usize)]) -> PathBuf {
    let folder = root.join("in").join(name);
    fs::create_dir_all(&folder).expect("mkdir");
    let header = NiftiHeader::default();
    save_volume(
        &folder.join("t1.nii.gz"),
        &Array3::<f32>::zeros(SHAPE),
        &header,
    )
    .expect("volume");
    let mut mask = Array3::<f32>::zeros(SHAPE);
    for (corner, size) in cubes {
        for x in corner[0]..corner[0] + size {
            for y in corner[1]..corner[1] + size {
                for z in corner[2]..corner[2] + size {
                    mask[[x, y, z]] = 1.0;
                }
            }
        }
    }
    save_volume(&folder.join("t1_label_tumor.nii.gz"), &mask, &header).expect("mask");
    folder
}

#[test]
fn three_patient_cohort_counts_two() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(dir.path());
    write_atlas(&cfg.atlas_path);
    // 5^3 = 125 voxels = 0.125 ml at unit spacing, above the centroid cutoff.
    write_patient(dir.path(), "pat_a", &[([2, 2, 2], 5)]);
    // All-zero mask: skipped, uncounted.
    write_patient(dir.path(), "pat_b", &[]);
    // Overlaps pat_a at [4..7)^3, plus a lone voxel below 0.1 ml.
    write_patient(dir.path(), "pat_c", &[([4, 4, 4], 5), ([2, 20, 2], 1)]);

    let mut cohort = Cohort::load(&cfg).expect("cohort");
    assert_eq!(cohort.len(), 3);
    run_heatmap_task(&cfg, &mut cohort, None).expect("task");

    let overall = cfg.output_folder.join("Heatmaps").join("Overall");
    let cumulative = Volume::load(&overall.join("heatmap_cumulative.nii.gz")).expect("cumulative");
    let percentages =
        Volume::load(&overall.join("heatmap_percentages.nii.gz")).expect("percentages");
    // Two counted patients: overlap voxels reach 2 (100%), exclusive voxels
    // 1 (50%), untouched voxels 0.
    assert_eq!(cumulative.data[[5, 5, 5]], 2.0);
    assert_eq!(cumulative.data[[2, 2, 2]], 1.0);
    assert_eq!(cumulative.data[[8, 8, 8]], 1.0);
    assert_eq!(cumulative.data[[15, 15, 15]], 0.0);
    assert!((percentages.data[[5, 5, 5]] - 1.0).abs() < 1e-6);
    assert!((percentages.data[[2, 2, 2]] - 0.5).abs() < 1e-6);
    assert_eq!(percentages.data[[15, 15, 15]], 0.0);

    // The lone voxel of pat_c is part of the presence map but below the
    // centroid volume cutoff.
    assert_eq!(cumulative.data[[2, 20, 2]], 1.0);
    let centroids =
        Volume::load(&overall.join("heatmap_centroids_cumulative.nii.gz")).expect("centroids");
    assert_eq!(centroids.data[[2, 20, 2]], 0.0);
    // Main-component centroids at (4,4,4) and (6,6,6); their cubes overlap.
    assert_eq!(centroids.data[[5, 5, 5]], 2.0);

    // Provenance indices follow processing order, first writer wins on
    // overlap; the look-up table maps indices back to patient ids.
    let provenance =
        Volume::load(&overall.join("heatmap_patient_ids.nii.gz")).expect("provenance");
    assert_eq!(provenance.data[[1, 1, 1]], 1.0);
    assert_eq!(provenance.data[[9, 9, 9]], 2.0);
    assert_eq!(provenance.data[[5, 5, 5]], 1.0);
    let lut = fs::read_to_string(overall.join("patient_ids_lut.csv")).expect("lut");
    assert!(lut.contains("1,pat_a"));
    assert!(lut.contains("2,pat_c"));
    assert!(!lut.contains("pat_b"));
}

#[test]
fn overlapping_centroid_cubes_keep_the_first_owner() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(dir.path());
    write_atlas(&cfg.atlas_path);
    // Identical lesions: the centroid cubes coincide exactly.
    write_patient(dir.path(), "pat_a", &[([8, 8, 8], 5)]);
    write_patient(dir.path(), "pat_b", &[([8, 8, 8], 5)]);

    let cohort = Cohort::load(&cfg).expect("cohort");
    let atlas = Volume::load(&cfg.atlas_path).expect("atlas");
    let out = cfg.output_folder.join("Heatmaps").join("Overall");
    let engine = HeatmapEngine::new(&atlas, String::new(), out.clone());
    let summary = engine.run(&cohort, &cfg, &StratumFilter::All).expect("run");
    assert_eq!(summary.counted(), 2);

    let centroids =
        Volume::load(&out.join("heatmap_centroids_cumulative.nii.gz")).expect("centroids");
    let provenance = Volume::load(&out.join("heatmap_patient_ids.nii.gz")).expect("provenance");
    assert_eq!(centroids.data[[10, 10, 10]], 2.0);
    assert_eq!(provenance.data[[10, 10, 10]], 1.0);
}

#[test]
fn mismatched_grid_patient_is_skipped_and_uncounted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(dir.path());
    write_atlas(&cfg.atlas_path);
    write_patient(dir.path(), "pat_a", &[([2, 2, 2], 5)]);
    // pat_b's mask lives on a smaller grid than the atlas.
    let folder = dir.path().join("in").join("pat_b");
    fs::create_dir_all(&folder).expect("mkdir");
    let header = NiftiHeader::default();
    save_volume(
        &folder.join("t1.nii.gz"),
        &Array3::<f32>::zeros((16, 16, 16)),
        &header,
    )
    .expect("volume");
    let mut mask = Array3::<f32>::zeros((16, 16, 16));
    mask[[3, 3, 3]] = 1.0;
    save_volume(&folder.join("t1_label_tumor.nii.gz"), &mask, &header).expect("mask");

    let cohort = Cohort::load(&cfg).expect("cohort");
    assert_eq!(cohort.len(), 2);
    let atlas = Volume::load(&cfg.atlas_path).expect("atlas");
    let out = cfg.output_folder.join("Heatmaps").join("Overall");
    let engine = HeatmapEngine::new(&atlas, String::new(), out.clone());
    let summary = engine.run(&cohort, &cfg, &StratumFilter::All).expect("run");
    assert_eq!(summary.counted(), 1);

    // pat_b left no trace: percentages divide by one counted patient, and
    // the look-up table only knows pat_a.
    let percentages = Volume::load(&out.join("heatmap_percentages.nii.gz")).expect("percentages");
    assert!((percentages.data[[3, 3, 3]] - 1.0).abs() < 1e-6);
    let lut = fs::read_to_string(out.join("patient_ids_lut.csv")).expect("lut");
    assert!(lut.contains("1,pat_a"));
    assert!(!lut.contains("pat_b"));
}

#[test]
fn reruns_are_deterministic() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(dir.path());
    write_atlas(&cfg.atlas_path);
    write_patient(dir.path(), "pat_a", &[([2, 2, 2], 5)]);
    write_patient(dir.path(), "pat_b", &[([10, 10, 10], 6)]);

    let cohort = Cohort::load(&cfg).expect("cohort");
    let atlas = Volume::load(&cfg.atlas_path).expect("atlas");
    let first = cfg.output_folder.join("run1");
    let second = cfg.output_folder.join("run2");
    for out in [&first, &second] {
        let engine = HeatmapEngine::new(&atlas, String::new(), out.clone());
        engine.run(&cohort, &cfg, &StratumFilter::All).expect("run");
    }
    for name in [
        "heatmap_cumulative.nii.gz",
        "heatmap_percentages.nii.gz",
        "heatmap_centroids_cumulative.nii.gz",
        "heatmap_patient_ids.nii.gz",
    ] {
        let a = Volume::load(&first.join(name)).expect("first");
        let b = Volume::load(&second.join(name)).expect("second");
        assert_eq!(a.data, b.data, "{name} differs between reruns");
    }
}

#[test]
fn run_without_eligible_patients_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(dir.path());
    write_atlas(&cfg.atlas_path);
    // Only a mask-less patient: nothing to count.
    let folder = dir.path().join("in").join("pat_a");
    fs::create_dir_all(&folder).expect("mkdir");
    save_volume(
        &folder.join("t1.nii.gz"),
        &Array3::<f32>::zeros(SHAPE),
        &NiftiHeader::default(),
    )
    .expect("volume");

    let cohort = Cohort::load(&cfg).expect("cohort");
    let atlas = Volume::load(&cfg.atlas_path).expect("atlas");
    let engine = HeatmapEngine::new(
        &atlas,
        String::new(),
        cfg.output_folder.join("Heatmaps").join("Overall"),
    );
    let err = engine
        .run(&cohort, &cfg, &StratumFilter::All)
        .err()
        .expect("empty run must fail");
    assert_eq!(err.info().code, "heatmap-empty-run");
}

#[test]
fn stratified_runs_write_suffixed_outputs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(dir.path());
    write_atlas(&cfg.atlas_path);
    write_patient(dir.path(), "pat_a", &[([2, 2, 2], 5)]);
    write_patient(dir.path(), "pat_b", &[([12, 12, 12], 5)]);

    let params = dir.path().join("params.csv");
    fs::write(&params, "Patient,Volume\npat_a,5\npat_b,25\n").expect("params");
    cfg.extra_parameters_file = Some(params);
    cfg.strata.dense.push(lesionmaps_core::config::DenseStratumSpec {
        variable: "Volume".to_string(),
        thresholds: vec![10.0, 20.0],
    });

    let mut cohort = Cohort::load(&cfg).expect("cohort");
    run_heatmap_task(&cfg, &mut cohort, None).expect("task");

    let root = cfg.output_folder.join("Heatmaps");
    assert!(root
        .join("Population_Volume_le10")
        .join("heatmap_cumulative_Volume_le10.nii.gz")
        .exists());
    assert!(root
        .join("Population_Volume_gt20")
        .join("heatmap_cumulative_Volume_gt20.nii.gz")
        .exists());
    // The middle bucket has no patients; its run is skipped, not fatal.
    assert!(!root.join("Population_Volume_10-20").exists()
        || !root
            .join("Population_Volume_10-20")
            .join("heatmap_cumulative_Volume_10-20.nii.gz")
            .exists());

    let low = Volume::load(
        &root
            .join("Population_Volume_le10")
            .join("heatmap_cumulative_Volume_le10.nii.gz"),
    )
    .expect("low");
    // Only pat_a is in the low stratum.
    assert_eq!(low.data[[3, 3, 3]], 1.0);
    assert_eq!(low.data[[14, 14, 14]], 0.0);
}
