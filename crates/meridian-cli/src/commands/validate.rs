use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use console::style;
use meridian_core::combine::validate::validate_frames;

#[derive(Args)]
pub struct ValidateArgs {
    /// Frames to check
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Print the full report as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: &ValidateArgs) -> Result<()> {
    let report = validate_frames(&args.files);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{} valid, {} invalid",
        style(report.valid_count).green().bold(),
        style(report.invalid_count).red().bold()
    );
    for invalid in &report.invalid_files {
        println!("  {}: {}", invalid.path.display(), invalid.reason);
    }
    if report.dimension_mismatch {
        println!(
            "{} frames disagree on dimensions: {:?}",
            style("warning:").yellow().bold(),
            report.dimensions
        );
        println!("These frames cannot be combined together.");
    }
    Ok(())
}
