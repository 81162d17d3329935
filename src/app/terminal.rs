use crate::cli::Args;

/// Maps a `LOG_LEVEL` value onto a filter directive. `None` for unknown values.
pub(crate) fn parse_log_level(value: &str) -> Option<&'static str> {
    match value.trim().to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}

/// Default level when `RUST_LOG` is not set.
/// Priority: `--log-level`/`LOG_LEVEL` > quiet flag > verbose flag > info.
pub(crate) fn resolve_default_log_level(args: &Args) -> &'static str {
    if let Some(level) = args.log_level.as_deref().and_then(parse_log_level) {
        return level;
    }
    if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

pub(crate) fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}
