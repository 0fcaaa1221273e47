use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use console::style;
use meridian_core::quality::{analyze_batch, filter_by_quality};

#[derive(Args)]
pub struct QualityArgs {
    /// Frames to analyze
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Detection threshold in sigma above background
    #[arg(long, default_value = "3.0")]
    pub threshold_sigma: f64,

    /// Reject frames with fewer stars than this
    #[arg(long)]
    pub min_stars: Option<usize>,

    /// Reject frames with median FWHM above this (pixels)
    #[arg(long)]
    pub max_fwhm: Option<f64>,

    /// Reject frames with median FWHM below this (pixels)
    #[arg(long)]
    pub min_fwhm: Option<f64>,

    /// Print the full metrics as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: &QualityArgs) -> Result<()> {
    let metrics = analyze_batch(&args.files, args.threshold_sigma);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
        return Ok(());
    }

    for m in &metrics {
        if let Some(error) = &m.error {
            println!("{}  {}", m.file.display(), style(error).red());
            continue;
        }
        match m.fwhm_median {
            Some(fwhm) => println!(
                "{}  {} stars  FWHM {:.2}px  bg {:.1}",
                m.file.display(),
                m.star_count,
                fwhm,
                m.background_median.unwrap_or(0.0)
            ),
            None => println!(
                "{}  no sources detected  bg {:.1}",
                m.file.display(),
                m.background_median.unwrap_or(0.0)
            ),
        }
    }

    if args.min_stars.is_some() || args.max_fwhm.is_some() || args.min_fwhm.is_some() {
        let passed: Vec<PathBuf> =
            filter_by_quality(&metrics, args.min_stars, args.max_fwhm, args.min_fwhm);
        println!(
            "{} {}/{} frames pass the quality gate",
            style("Filter:").bold(),
            passed.len(),
            metrics.len()
        );
        for path in passed {
            println!("  {}", path.display());
        }
    }
    Ok(())
}
