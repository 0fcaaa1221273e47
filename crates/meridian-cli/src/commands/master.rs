use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};
use console::style;
use meridian_core::frame::ImageType;
use meridian_core::masters::{MasterService, MasterTags};

use super::stack::{MethodArg, RejectionOpts};

#[derive(Clone, Copy, ValueEnum)]
pub enum MasterTypeArg {
    Bias,
    Dark,
    Flat,
}

impl From<MasterTypeArg> for ImageType {
    fn from(arg: MasterTypeArg) -> Self {
        match arg {
            MasterTypeArg::Bias => ImageType::Bias,
            MasterTypeArg::Dark => ImageType::Dark,
            MasterTypeArg::Flat => ImageType::Flat,
        }
    }
}

#[derive(Args)]
pub struct MasterArgs {
    /// Project directory holding the registries and master files
    #[arg(long, default_value = ".")]
    pub project: PathBuf,

    #[command(subcommand)]
    pub action: MasterAction,
}

#[derive(Subcommand)]
pub enum MasterAction {
    /// Combine raw calibration frames into a master frame
    Create {
        /// Calibration session id
        #[arg(long)]
        session: String,

        /// Master frame type
        #[arg(long, value_enum)]
        frame_type: MasterTypeArg,

        /// Raw frames to combine
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Combination method
        #[arg(long, value_enum, default_value = "median")]
        method: MethodArg,

        #[command(flatten)]
        rejection: RejectionOpts,

        /// Exposure time tag in seconds (darks/flats)
        #[arg(long)]
        exposure: Option<f64>,

        /// Gain setting tag
        #[arg(long)]
        gain: Option<i64>,

        /// Filter name tag (flats)
        #[arg(long)]
        filter: Option<String>,
    },
    /// List recorded masters, optionally for one session
    List {
        #[arg(long)]
        session: Option<String>,
    },
    /// Delete a master record
    Delete {
        id: String,
        /// Also remove the backing file
        #[arg(long)]
        delete_file: bool,
    },
    /// Summarize the calibration frames in a directory
    Scan { dir: PathBuf },
}

pub fn run(args: &MasterArgs) -> Result<()> {
    let service = MasterService::open(&args.project);

    match &args.action {
        MasterAction::Create {
            session,
            frame_type,
            files,
            method,
            rejection,
            exposure,
            gain,
            filter,
        } => {
            let tags = MasterTags {
                exposure_time: *exposure,
                gain: *gain,
                filter: filter.clone(),
            };
            let master = service.create_master(
                session,
                (*frame_type).into(),
                files,
                (*method).into(),
                &rejection.policy(),
                tags,
            )?;
            println!(
                "{} {} from {} frames ({})",
                style("Created").green().bold(),
                master.filename,
                master.num_frames,
                master.id
            );
        }
        MasterAction::List { session } => {
            let masters = service.masters(session.as_deref())?;
            if masters.is_empty() {
                println!("No master frames recorded.");
            }
            for m in masters {
                println!(
                    "{}  {:5}  {}  ({} frames, {} / {})",
                    m.id,
                    m.frame_type.to_string(),
                    m.filename,
                    m.num_frames,
                    m.combination_method,
                    m.rejection_method
                );
            }
        }
        MasterAction::Delete { id, delete_file } => {
            if service.delete_master(id, *delete_file)? {
                println!("Deleted master {id}");
            } else {
                println!("No master with id {id}");
            }
        }
        MasterAction::Scan { dir } => {
            let frames = service.scan_frames(dir)?;
            println!("{} frames in {}", frames.len(), dir.display());
            for info in frames {
                match info.dimensions {
                    Some((h, w)) => println!(
                        "  {}  {}x{}  mean {:.1}  {}",
                        info.filename,
                        w,
                        h,
                        info.mean.unwrap_or(0.0),
                        info.image_type
                            .map(|t| t.to_string())
                            .unwrap_or_else(|| "?".into())
                    ),
                    None => println!(
                        "  {}  {}",
                        info.filename,
                        style(info.error.as_deref().unwrap_or("unreadable")).red()
                    ),
                }
            }
        }
    }
    Ok(())
}
