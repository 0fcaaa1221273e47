use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use console::style;
use indicatif::ProgressBar;
use meridian_core::calibrate::{calibrate_batch, CalibrationConfig};
use std::time::Duration;

#[derive(Args)]
pub struct CalibrateArgs {
    /// Science frames to calibrate
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Master bias frame
    #[arg(long)]
    pub bias: Option<PathBuf>,

    /// Master dark frame
    #[arg(long)]
    pub dark: Option<PathBuf>,

    /// Master flat frame
    #[arg(long)]
    pub flat: Option<PathBuf>,

    /// Do not scale the dark by the exposure-time ratio
    #[arg(long)]
    pub no_dark_scale: bool,

    /// Output directory for calibrated frames
    #[arg(long, default_value = "calibrated")]
    pub output_dir: PathBuf,
}

pub fn run(args: &CalibrateArgs) -> Result<()> {
    if args.bias.is_none() && args.dark.is_none() && args.flat.is_none() {
        anyhow::bail!("at least one master frame (--bias, --dark, --flat) is required");
    }

    let config = CalibrationConfig {
        master_bias: args.bias.clone(),
        master_dark: args.dark.clone(),
        master_flat: args.flat.clone(),
        dark_scale: !args.no_dark_scale,
    };

    let pb = ProgressBar::new_spinner();
    pb.set_message(format!("Calibrating {} frames...", args.files.len()));
    pb.enable_steady_tick(Duration::from_millis(100));

    let batch = calibrate_batch(&args.files, &args.output_dir, &config);
    pb.finish_and_clear();

    println!(
        "{} {}/{} frames calibrated into {}",
        style("Done:").green().bold(),
        batch.successful,
        batch.total,
        args.output_dir.display()
    );
    for outcome in batch.results.iter().filter(|r| !r.success) {
        println!(
            "  {} {}: {}",
            style("failed").red(),
            outcome.input.display(),
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    if let Some(first) = batch.results.iter().find_map(|r| r.stats.as_ref()) {
        println!("  steps: {}", first.steps_applied.join(", "));
    }
    Ok(())
}
