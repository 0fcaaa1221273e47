use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use meridian_core::camera::{characterize, create_sensor_profile, CharacterizationInput};

#[derive(Args)]
pub struct CharacterizeArgs {
    /// Two bias frames taken back to back
    #[arg(long, num_args = 2, required = true)]
    pub bias: Vec<PathBuf>,

    /// Two flat frames at identical illumination
    #[arg(long, num_args = 2, required = true)]
    pub flat: Vec<PathBuf>,

    /// Camera model for the sensor profile
    #[arg(long)]
    pub camera: Option<String>,

    /// Gain setting the frames were taken at
    #[arg(long)]
    pub gain_setting: Option<i64>,

    /// Sensor temperature in Celsius
    #[arg(long)]
    pub temperature: Option<f64>,

    /// Write the sensor profile as JSON to this path
    #[arg(long)]
    pub profile_out: Option<PathBuf>,
}

pub fn run(args: &CharacterizeArgs) -> Result<()> {
    let input = CharacterizationInput {
        bias_frames: args.bias.clone(),
        flat_frames: args.flat.clone(),
    };
    let result = characterize(&input)?;

    println!("{}", style("Sensor characterization").bold());
    println!("  read noise   {:.2} e-", result.read_noise);
    println!("  gain         {:.3} e-/ADU", result.gain);
    println!("  full well    {} e-", result.full_well_capacity);
    println!("  confidence   {:.0}%", result.confidence * 100.0);
    for warning in &result.warnings {
        println!("  {} {}", style("warning:").yellow(), warning);
    }

    if let Some(path) = &args.profile_out {
        let camera = args.camera.as_deref().unwrap_or("unknown");
        let profile = create_sensor_profile(
            &result,
            camera,
            args.gain_setting,
            None,
            args.temperature,
            "1x1",
        );
        std::fs::write(path, serde_json::to_string_pretty(&profile)?)
            .with_context(|| format!("failed to write profile to {}", path.display()))?;
        println!("Profile saved to {}", path.display());
    }
    Ok(())
}
