use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use console::style;
use indicatif::ProgressBar;
use meridian_core::quality::analyze_batch;
use meridian_core::register::{register_batch, select_reference};
use std::time::Duration;

#[derive(Args)]
pub struct RegisterArgs {
    /// Frames to align
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Reference frame; picked by best FWHM when omitted
    #[arg(long)]
    pub reference: Option<PathBuf>,

    /// Star detection threshold in sigma above background
    #[arg(long, default_value = "5.0")]
    pub detection_sigma: f64,

    /// Output directory for aligned frames
    #[arg(long, default_value = "registered")]
    pub output_dir: PathBuf,
}

pub fn run(args: &RegisterArgs) -> Result<()> {
    let reference = match &args.reference {
        Some(path) => path.clone(),
        None => {
            println!("Selecting reference by quality...");
            let metrics = analyze_batch(&args.files, args.detection_sigma);
            select_reference(&args.files, Some(&metrics))?
        }
    };
    println!("Reference: {}", reference.display());

    let pb = ProgressBar::new_spinner();
    pb.set_message(format!("Registering {} frames...", args.files.len()));
    pb.enable_steady_tick(Duration::from_millis(100));

    let batch = register_batch(&args.files, &reference, &args.output_dir, args.detection_sigma);
    pb.finish_and_clear();

    println!(
        "{} {}/{} frames aligned into {}",
        style("Done:").green().bold(),
        batch.successful,
        batch.total,
        args.output_dir.display()
    );
    for outcome in &batch.results {
        match &outcome.result {
            Some(r) => println!(
                "  {} {} ({} control points)",
                style("ok").green(),
                outcome.source.display(),
                r.num_matches
            ),
            None => println!(
                "  {} {}: {}",
                style("failed").red(),
                outcome.source.display(),
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    Ok(())
}
