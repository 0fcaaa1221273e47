use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use meridian_core::calibrate::CalibrationConfig;
use meridian_core::combine::{CombineMethod, RejectionPolicy};
use meridian_core::pipeline::PipelineService;
use serde::{Deserialize, Serialize};

/// Everything one `run` invocation needs, loadable from TOML.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    /// Project directory for registries and outputs
    pub project: PathBuf,
    /// Object name, used for the output directory layout
    pub object: String,
    /// Filters expected in this data set
    #[serde(default)]
    pub filters: Vec<String>,
    /// Raw science frames
    pub lights: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_bias: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_dark: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_flat: Option<PathBuf>,
    /// Scale the dark by the exposure-time ratio
    #[serde(default = "default_true")]
    pub dark_scale: bool,
    /// Quality analysis detection threshold (sigma)
    #[serde(default = "default_analysis_sigma")]
    pub threshold_sigma: f64,
    /// Registration star detection threshold (sigma)
    #[serde(default = "default_detection_sigma")]
    pub detection_sigma: f64,
    /// Stacking method
    pub method: CombineMethod,
    /// Stacking rejection policy
    pub rejection: RejectionPolicy,
}

fn default_true() -> bool {
    true
}

fn default_analysis_sigma() -> f64 {
    3.0
}

fn default_detection_sigma() -> f64 {
    5.0
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            project: PathBuf::from("."),
            object: "M31".into(),
            filters: vec!["L".into()],
            lights: vec![PathBuf::from("lights/light_001.fits")],
            master_bias: None,
            master_dark: None,
            master_flat: None,
            dark_scale: true,
            threshold_sigma: default_analysis_sigma(),
            detection_sigma: default_detection_sigma(),
            method: CombineMethod::Median,
            rejection: RejectionPolicy::default(),
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    /// Run configuration (TOML)
    #[arg(long)]
    pub config: PathBuf,
}

pub fn run(args: &RunArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.config)
        .with_context(|| format!("failed to read {}", args.config.display()))?;
    let config: RunConfig = toml::from_str(&text)
        .with_context(|| format!("invalid run config {}", args.config.display()))?;

    let service = PipelineService::open(&config.project);
    let pipeline =
        service.create_pipeline(&config.object, config.filters.clone(), None)?;
    println!(
        "{} pipeline {} for {}",
        style("Created").green().bold(),
        pipeline.id,
        config.object
    );

    // Calibration
    println!("{}", style("Calibrating...").bold());
    let calibration = CalibrationConfig {
        master_bias: config.master_bias.clone(),
        master_dark: config.master_dark.clone(),
        master_flat: config.master_flat.clone(),
        dark_scale: config.dark_scale,
    };
    let cal = service.execute_calibration(&pipeline.id, &config.lights, &calibration)?;
    println!("  {}/{} frames calibrated", cal.successful, cal.total);

    let calibrated: Vec<PathBuf> = cal
        .results
        .iter()
        .filter_map(|r| r.stats.as_ref().map(|s| s.output.clone()))
        .collect();
    if calibrated.is_empty() {
        anyhow::bail!("no frames survived calibration");
    }

    // Quality analysis
    println!("{}", style("Analyzing quality...").bold());
    let report =
        service.execute_quality_analysis(&pipeline.id, &calibrated, config.threshold_sigma)?;
    let with_stars = report.metrics.iter().filter(|m| m.star_count > 0).count();
    println!("  {}/{} frames with detected stars", with_stars, report.total);

    // Registration
    println!("{}", style("Registering...").bold());
    let reg = service.execute_registration(
        &pipeline.id,
        &calibrated,
        None,
        Some(&report.metrics),
        config.detection_sigma,
    )?;
    println!(
        "  reference {}\n  {}/{} frames aligned",
        reg.reference.display(),
        reg.successful,
        reg.total
    );

    // Stacking: reference plus everything that aligned.
    println!("{}", style("Stacking...").bold());
    let mut to_stack: Vec<PathBuf> = reg
        .results
        .iter()
        .filter_map(|r| r.result.as_ref().map(|res| res.output.clone()))
        .collect();
    to_stack.push(reg.reference.clone());

    let stacked =
        service.execute_stacking(&pipeline.id, &to_stack, config.method, &config.rejection)?;
    for (filter, outcome) in &stacked.results {
        match &outcome.stats {
            Some(stats) => println!(
                "  {} {} -> {}",
                style("ok").green(),
                filter,
                stats.output_path.display()
            ),
            None => println!(
                "  {} {}: {}",
                style("failed").red(),
                filter,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }

    let finished = service.pipeline(&pipeline.id)?;
    println!(
        "{} pipeline {} is {}",
        style("Done:").green().bold(),
        finished.id,
        finished.status
    );
    Ok(())
}
