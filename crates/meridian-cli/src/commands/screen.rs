use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use console::style;
use meridian_core::quality::anomaly::{analyze_session, ScreeningConfig, ScreeningOutcome};

#[derive(Args)]
pub struct ScreenArgs {
    /// All frames of one imaging session
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Expected fraction of outlier frames
    #[arg(long, default_value = "0.1")]
    pub contamination: f64,

    /// Print the full report as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: &ScreenArgs) -> Result<()> {
    let config = ScreeningConfig {
        contamination: args.contamination,
    };
    let outcome = analyze_session(&args.files, &config);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match outcome {
        ScreeningOutcome::InsufficientData {
            frame_count,
            required,
        } => {
            println!(
                "{} only {frame_count} usable frames; screening needs at least {required}",
                style("Not enough data:").yellow().bold()
            );
        }
        ScreeningOutcome::Report(report) => {
            println!(
                "{} of {} frames accepted ({:.0}% rejected)",
                style(report.accepted).green().bold(),
                report.total_frames,
                report.rejection_percentage
            );
            for rejected in &report.rejected_frames {
                println!(
                    "  {} {}: {}",
                    style("rejected").red(),
                    rejected.path.display(),
                    rejected.reason
                );
            }
            let stats = &report.statistics;
            println!(
                "accepted set: FWHM {:.2}px  background {:.1}  stars {:.0}",
                stats.fwhm.median, stats.background.median, stats.star_count.median
            );
        }
    }
    Ok(())
}
