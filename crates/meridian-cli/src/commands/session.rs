use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use meridian_core::masters::MasterService;

#[derive(Args)]
pub struct SessionArgs {
    /// Project directory holding the registries
    #[arg(long, default_value = ".")]
    pub project: PathBuf,

    #[command(subcommand)]
    pub action: SessionAction,
}

#[derive(Subcommand)]
pub enum SessionAction {
    /// Create a calibration session
    Create {
        name: String,
        /// Session date (YYYY-MM-DD)
        #[arg(long)]
        date: String,
        #[arg(long)]
        telescope: Option<String>,
        #[arg(long)]
        camera: Option<String>,
    },
    /// List calibration sessions
    List,
}

pub fn run(args: &SessionArgs) -> Result<()> {
    let service = MasterService::open(&args.project);

    match &args.action {
        SessionAction::Create {
            name,
            date,
            telescope,
            camera,
        } => {
            let session =
                service.create_session(name, date, telescope.clone(), camera.clone())?;
            println!("Created session {} ({})", session.name, session.id);
        }
        SessionAction::List => {
            let sessions = service.sessions()?;
            if sessions.is_empty() {
                println!("No calibration sessions.");
            }
            for s in sessions {
                let rig = match (&s.telescope, &s.camera) {
                    (Some(t), Some(c)) => format!(" [{t} / {c}]"),
                    (Some(t), None) => format!(" [{t}]"),
                    (None, Some(c)) => format!(" [{c}]"),
                    (None, None) => String::new(),
                };
                println!("{}  {}  {}{}", s.id, s.date, s.name, rig);
            }
        }
    }
    Ok(())
}
