//! Command-line interface definitions for Guidance Watch.
//!
//! Every option has a default, so a bare `guidance_watch` polls every source
//! into `./data`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::sources::Job;

/// Which polling job(s) to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JobSelection {
    /// Listing sources (published guidance)
    Guidance,
    /// Feed sources (blogs and bulletins)
    News,
    /// Both jobs, guidance first
    All,
}

impl JobSelection {
    pub fn jobs(self) -> Vec<Job> {
        match self {
            JobSelection::Guidance => vec![Job::Guidance],
            JobSelection::News => vec![Job::News],
            JobSelection::All => vec![Job::Guidance, Job::News],
        }
    }
}

/// Command-line arguments for Guidance Watch.
///
/// # Examples
///
/// ```sh
/// # Poll everything into ./data
/// guidance_watch
///
/// # Only the feeds, with a settings file
/// guidance_watch --job news -s watch.yaml
///
/// # Re-evaluate every listed link, ignoring cached fingerprints
/// guidance_watch --job guidance --force
///
/// # Print what is stored without fetching
/// guidance_watch --data-dir /srv/watch --status
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Directory holding the JSON documents
    #[arg(short, long, env = "GUIDANCE_WATCH_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Optional path to a YAML settings file
    #[arg(short, long, env = "GUIDANCE_WATCH_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Job to run
    #[arg(short, long, value_enum, default_value_t = JobSelection::All)]
    pub job: JobSelection,

    /// Ignore listing fingerprints and seen markers for this run
    #[arg(short, long)]
    pub force: bool,

    /// Print a summary of stored state and exit without fetching
    #[arg(long, conflicts_with = "force")]
    pub status: bool,
}
