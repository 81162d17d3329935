//! CLI entry point for the ratings sync service.

use std::process::ExitCode;

use tracing::error;

mod app;
mod cli;

/// How the process ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Stopped on request, or a single cycle finished.
    Success,
    /// A fatal error ended the process.
    Failure,
    /// A single `--once` cycle was cut short and will need another run.
    Aborted,
}

impl ProcessExit {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Aborted => 2,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match app::runtime::run_sync().await {
        Ok(exit) => ExitCode::from(exit.code()),
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
