//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use stagesync_core::scale::Scale;

/// Command-line arguments for `stagesync`.
#[derive(Parser, Debug)]
#[command(name = "stagesync")]
#[command(about = "Submit images to a staged upscaling service and follow their progress")]
#[command(version)]
pub struct Cli {
    /// Service root; overrides `STAGESYNC_BASE_URL`.
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upscale one image and write the result next to it.
    Run(RunArgs),
    /// List the scale factors the service supports.
    Scales,
    /// Show service health.
    Health,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Image to upscale (png, jpeg or webp).
    pub input: PathBuf,

    /// Where to write the result.  Defaults to `<stem>_<scale>x.png`
    /// beside the input.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Scale factor, `2` or `4`.  Defaults to `STAGESYNC_DEFAULT_SCALE`.
    #[arg(short, long)]
    pub scale: Option<Scale>,

    /// Reuse a specific job identifier instead of generating one.
    #[arg(long)]
    pub job_id: Option<String>,

    /// Declared media type, when the file extension is not enough.
    #[arg(long)]
    pub media_type: Option<String>,

    /// Print the full stage checklist on every change.
    #[arg(long)]
    pub checklist: bool,
}
