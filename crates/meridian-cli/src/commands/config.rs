use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use super::pipeline::RunConfig;

#[derive(Args)]
pub struct ConfigArgs {
    /// Write the config to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Print or save a full default run configuration as TOML.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let config = RunConfig::default();
    let toml_str = toml::to_string_pretty(&config)?;

    if let Some(path) = &args.output {
        std::fs::write(path, &toml_str)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        println!("Default config saved to {}", path.display());
    } else {
        print!("{toml_str}");
    }
    Ok(())
}
