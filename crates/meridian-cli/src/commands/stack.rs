use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, ValueEnum};
use console::style;
use meridian_core::combine::{CombineMethod, RejectionPolicy};
use meridian_core::stack::{stack_by_filter, stack_images};

#[derive(Clone, Copy, ValueEnum)]
pub enum MethodArg {
    Average,
    Median,
}

impl From<MethodArg> for CombineMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Average => CombineMethod::Average,
            MethodArg::Median => CombineMethod::Median,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RejectionArg {
    None,
    SigmaClip,
    Minmax,
}

/// Shared rejection flags, resolved into a [`RejectionPolicy`] once at the
/// command boundary.
#[derive(Args, Clone)]
pub struct RejectionOpts {
    /// Per-pixel outlier rejection
    #[arg(long, value_enum, default_value = "sigma-clip")]
    pub rejection: RejectionArg,

    /// Sigma-clip lower threshold (standard deviations below the median)
    #[arg(long, default_value = "3.0")]
    pub sigma_low: f64,

    /// Sigma-clip upper threshold
    #[arg(long, default_value = "3.0")]
    pub sigma_high: f64,

    /// Lowest values discarded per pixel (minmax rejection)
    #[arg(long, default_value = "1")]
    pub minmax_min: usize,

    /// Highest values discarded per pixel (minmax rejection)
    #[arg(long, default_value = "1")]
    pub minmax_max: usize,
}

impl RejectionOpts {
    pub fn policy(&self) -> RejectionPolicy {
        match self.rejection {
            RejectionArg::None => RejectionPolicy::None,
            RejectionArg::SigmaClip => RejectionPolicy::SigmaClip {
                low: self.sigma_low,
                high: self.sigma_high,
            },
            RejectionArg::Minmax => RejectionPolicy::MinMax {
                min: self.minmax_min,
                max: self.minmax_max,
            },
        }
    }
}

#[derive(Args)]
pub struct StackArgs {
    /// Aligned frames to integrate
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Combination method
    #[arg(long, value_enum, default_value = "median")]
    pub method: MethodArg,

    #[command(flatten)]
    pub rejection: RejectionOpts,

    /// Stack everything into this single file instead of grouping by filter
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output directory for per-filter stacks
    #[arg(long, default_value = "stacked")]
    pub output_dir: PathBuf,
}

pub fn run(args: &StackArgs) -> Result<()> {
    let method = args.method.into();
    let rejection = args.rejection.policy();

    if let Some(output) = &args.output {
        let stats = stack_images(&args.files, output, method, &rejection)?;
        println!(
            "{} {} frames -> {}",
            style("Stacked").green().bold(),
            stats.num_frames,
            output.display()
        );
        println!(
            "  mean {:.1}  median {:.1}  std {:.1}",
            stats.stats.mean, stats.stats.median, stats.stats.std
        );
        return Ok(());
    }

    println!("Stacking {} frames by filter...", args.files.len());
    let results = stack_by_filter(&args.files, &args.output_dir, method, &rejection);

    for (filter, outcome) in &results {
        if outcome.success {
            let stats = outcome.stats.as_ref().expect("successful stack has stats");
            println!(
                "  {} {} ({} frames) -> {}",
                style("ok").green(),
                filter,
                outcome.num_files,
                stats.output_path.display()
            );
        } else {
            println!(
                "  {} {} ({} frames): {}",
                style("failed").red(),
                filter,
                outcome.num_files,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    let failed = results.values().filter(|r| !r.success).count();
    if failed > 0 {
        println!(
            "{}",
            style(format!("{failed} filter group(s) failed")).yellow()
        );
    }
    Ok(())
}
