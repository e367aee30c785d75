mod platform;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use platform::logging::LogDestination;

/// Upload level archives and generate pack downloads.
#[derive(Debug, Parser)]
#[command(name = "leveltransfer", version)]
pub struct Cli {
    /// RON settings file; missing files fall back to defaults.
    #[arg(long, default_value = "leveltransfer.ron")]
    pub config: PathBuf,

    #[arg(long, env = "LEVELTRANSFER_API_URL")]
    pub api_url: Option<String>,

    #[arg(long)]
    pub chunk_size_mb: Option<u64>,

    #[arg(long, value_enum, default_value_t = LogTarget::File)]
    pub log: LogTarget,

    /// Repeat for more detail (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogTarget {
    File,
    Terminal,
    Both,
}

impl From<LogTarget> for LogDestination {
    fn from(target: LogTarget) -> Self {
        match target {
            LogTarget::File => LogDestination::File,
            LogTarget::Terminal => LogDestination::Terminal,
            LogTarget::Both => LogDestination::Both,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload a zip archive as the download of a level.
    Upload {
        #[arg(long)]
        level: u64,
        zip: PathBuf,
    },
    /// Remove the current upload of a level.
    DeleteUpload {
        #[arg(long)]
        level: u64,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// Generate (or fetch) the download archive of a pack or folder.
    PackDownload {
        #[arg(long)]
        pack: String,
        #[arg(long)]
        folder: Option<u64>,
        /// Shown in messages instead of the pack id.
        #[arg(long)]
        name: Option<String>,
        #[arg(long, conflicts_with = "items")]
        estimated_bytes: Option<u64>,
        /// RON file describing the pack tree, used for the size estimate.
        #[arg(long)]
        items: Option<PathBuf>,
    },
    /// Print the size estimate of a pack tree.
    Estimate {
        #[arg(long)]
        items: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    platform::logging::initialize(
        cli.log.into(),
        transfer_logging::level_for_verbosity(cli.verbose),
    );
    platform::app::run(cli)
}
