//! CLI argument definitions using clap derive macros.
//!
//! Every option can also be given through its environment variable so the
//! tool can run unattended in a container.

use std::path::PathBuf;

use clap::Parser;

use ratings_sync::config::{DEFAULT_EVERY_HOURS, MAX_EVERY_HOURS};

/// Keep the IMDb ratings of a media server catalog up to date.
///
/// Runs a synchronisation cycle immediately and then every
/// `--every-hours` hours until interrupted.
#[derive(Parser, Debug)]
#[command(name = "ratings-sync")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error); overrides -v/-q
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Media server data directory (contains 'Plug-in Support' and 'Metadata')
    #[arg(long, env = "PLEX_DATA_DIR")]
    pub plex_data_dir: PathBuf,

    /// TMDB API key; enables TMDB-matched libraries
    #[arg(long, env = "TMDB_API_KEY", hide_env_values = true)]
    pub tmdb_api_key: Option<String>,

    /// TVDB API key; enables TVDB-matched libraries
    #[arg(long, env = "TVDB_API_KEY", hide_env_values = true)]
    pub tvdb_api_key: Option<String>,

    /// Deprecated TVDB credentials in the form user;userkey;apikey
    #[arg(long, env = "TVDB_AUTH_STRING", hide_env_values = true, hide = true)]
    pub tvdb_auth_string: Option<String>,

    /// Library ids to skip, separated by ';'
    #[arg(long, env = "IGNORE_LIBS")]
    pub ignore_libs: Option<String>,

    /// Capability flags separated by ';' (NO_MOVIE, NO_TV)
    #[arg(long, env = "CAPABILITIES")]
    pub capabilities: Option<String>,

    /// Hours between cycles (1 to 8784)
    #[arg(
        long,
        env = "RUN_EVERY_N_HOUR",
        default_value_t = DEFAULT_EVERY_HOURS,
        value_parser = clap::value_parser!(u64).range(1..=MAX_EVERY_HOURS)
    )]
    pub every_hours: u64,

    /// Directory for caches, job state, the dataset copy and reports
    #[arg(long, env = "WORK_DIR", default_value = ".")]
    pub work_dir: PathBuf,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,
}
