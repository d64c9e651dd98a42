use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use lesionmaps_cohort::Cohort;
use lesionmaps_core::config::{MapsConfig, Task};
use lesionmaps_maps::{run_heatmap_task, run_metrics_task, CommandRunner, InferenceRunner};
use log::info;

#[derive(Parser, Debug)]
#[command(name = "lesionmaps", about = "Cohort lesion heatmaps and metrics in atlas space")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accumulate atlas-space lesion heatmaps, overall and per stratum.
    Heatmap(RunArgs),
    /// Compute per-patient metrics and merge them into one cohort table.
    Metrics(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// YAML configuration describing the run.
    #[arg(long)]
    config: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match cli.command {
        Command::Heatmap(args) => run(args, Task::Heatmap),
        Command::Metrics(args) => run(args, Task::Metrics),
    }
}

fn run(args: RunArgs, task: Task) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(&args.config)?;
    // The subcommand overrides whatever the file says.
    config.task = task;
    config.validate()?;
    fs::create_dir_all(&config.output_folder)?;

    let mut cohort = Cohort::load(&config)?;
    info!(
        "loaded {} patient(s) from {}",
        cohort.len(),
        config.input_folder.display()
    );

    match config.task {
        Task::Heatmap => {
            // No registration engine ships with the CLI; inputs must already
            // be in atlas space.
            run_heatmap_task(&config, &mut cohort, None)?;
        }
        Task::Metrics => {
            let runner = config.inference_command.clone().map(CommandRunner::new);
            run_metrics_task(
                &config,
                &mut cohort,
                runner.as_ref().map(|r| r as &dyn InferenceRunner),
            )?;
        }
    }
    Ok(())
}

fn load_config(path: &PathBuf) -> Result<MapsConfig, Box<dyn Error>> {
    let contents = fs::read_to_string(path)?;
    let config: MapsConfig = serde_yaml::from_str(&contents)?;
    Ok(config)
}
