mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "meridian", about = "Astrophotography calibration and stacking backend")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a batch of frames for loadability and matching dimensions
    Validate(commands::validate::ValidateArgs),
    /// Manage calibration sessions
    Session(commands::session::SessionArgs),
    /// Create, list, and delete master calibration frames
    Master(commands::master::MasterArgs),
    /// Apply master frames to science exposures
    Calibrate(commands::calibrate::CalibrateArgs),
    /// Measure per-frame quality metrics and filter by them
    Quality(commands::quality::QualityArgs),
    /// Screen a whole session for anomalous frames
    Screen(commands::screen::ScreenArgs),
    /// Align frames onto a reference via star matching
    Register(commands::register::RegisterArgs),
    /// Integrate aligned frames, grouped by filter
    Stack(commands::stack::StackArgs),
    /// Derive sensor read noise, gain, and full-well capacity
    Characterize(commands::characterize::CharacterizeArgs),
    /// Run the full pipeline for one object
    Run(commands::pipeline::RunArgs),
    /// Print or save a default run configuration
    Config(commands::config::ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Validate(args) => commands::validate::run(args),
        Commands::Session(args) => commands::session::run(args),
        Commands::Master(args) => commands::master::run(args),
        Commands::Calibrate(args) => commands::calibrate::run(args),
        Commands::Quality(args) => commands::quality::run(args),
        Commands::Screen(args) => commands::screen::run(args),
        Commands::Register(args) => commands::register::run(args),
        Commands::Stack(args) => commands::stack::run(args),
        Commands::Characterize(args) => commands::characterize::run(args),
        Commands::Run(args) => commands::pipeline::run(args),
        Commands::Config(args) => commands::config::run(args),
    }
}
