use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use ratings_sync::config::{parse_capabilities, parse_ignore_list, parse_tvdb_auth_string};
use ratings_sync::{
    BatchCycle, Caches, Capability, Catalog, CycleError, CycleOutcome, DatasetFetcher, JobRunner,
    JobStore, LookupClient, Pipeline, ResolverSet, SyncConfig, TmdbClient, TvdbClient,
};

use crate::ProcessExit;
use crate::app::{exit_handler, terminal};
use crate::cli::Args;

pub(crate) async fn run_sync() -> Result<ProcessExit> {
    let args = Args::parse();

    let default_level = terminal::resolve_default_log_level(&args);
    terminal::init_tracing(default_level);
    if let Some(level) = args.log_level.as_deref() {
        if terminal::parse_log_level(level).is_none() {
            warn!(level, "Unknown LOG_LEVEL; falling back to flags");
        }
    }

    info!("Ratings sync starting");

    let mut config = build_config(&args)?;
    let tmdb = connect_tmdb(&mut config).await?;
    let tvdb = connect_tvdb(&mut config).await?;
    info!(
        capabilities = ?config.capabilities,
        every_hours = args.every_hours,
        work_dir = %config.work_dir.display(),
        "Configuration ready"
    );

    let caches = Caches::open(&config.work_dir).await;
    let mut store = JobStore::load(config.job_state_path())
        .await
        .context("cannot read job state")?;
    if !store.is_empty() {
        info!(jobs = store.len(), "Resuming persisted jobs");
    }

    let pipeline = Pipeline::new(
        Catalog::new(config.catalog_path()),
        ResolverSet::new(&caches, tmdb, tvdb),
        config.metadata_roots(),
        &config.work_dir,
    );
    let cycle = BatchCycle::new(
        Catalog::new(config.catalog_path()),
        config.library_filter(),
        DatasetFetcher::new(&config.work_dir)?,
        caches,
        JobRunner::new(pipeline),
    );

    let exit = if args.once {
        let result = cycle.run(&mut store).await;
        log_cycle_result(&result);
        exit_handler::determine_exit_outcome(&result)
    } else {
        schedule(&cycle, &mut store, &config).await
    };

    flush_state(&cycle, &store).await;
    info!(code = exit.code(), "Ratings sync stopped");
    Ok(exit)
}

fn build_config(args: &Args) -> Result<SyncConfig> {
    let mut config = SyncConfig::new(&args.plex_data_dir, &args.work_dir)
        .with_every_hours(args.every_hours)?;

    if let Some(value) = args.capabilities.as_deref() {
        config.capabilities = parse_capabilities(value)?;
    }
    if let Some(value) = args.ignore_libs.as_deref() {
        config.ignored_libraries = parse_ignore_list(value);
    }
    config.tmdb_api_key = args.tmdb_api_key.clone().filter(|key| !key.trim().is_empty());
    config.tvdb_api_key = args
        .tvdb_api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .or_else(|| args.tvdb_auth_string.as_deref().and_then(parse_tvdb_auth_string));

    fs::create_dir_all(&config.work_dir).with_context(|| {
        format!("cannot create work directory {}", config.work_dir.display())
    })?;
    config.validate()?;
    Ok(config)
}

async fn connect_tmdb(config: &mut SyncConfig) -> Result<Option<Arc<dyn LookupClient>>> {
    let Some(key) = config.tmdb_api_key.as_deref() else {
        info!("No TMDB key; TMDB libraries are skipped");
        return Ok(None);
    };
    let client = TmdbClient::new(key)?;
    client
        .verify_credentials()
        .await
        .context("TMDB credentials were rejected")?;
    config.capabilities.insert(Capability::Tmdb);
    info!("TMDB credentials verified");
    Ok(Some(Arc::new(client)))
}

async fn connect_tvdb(config: &mut SyncConfig) -> Result<Option<Arc<dyn LookupClient>>> {
    let Some(key) = config.tvdb_api_key.as_deref() else {
        info!("No TVDB key; TVDB libraries are skipped");
        return Ok(None);
    };
    let client = TvdbClient::new(key)?;
    client
        .verify_credentials()
        .await
        .context("TVDB credentials were rejected")?;
    config.capabilities.insert(Capability::Tvdb);
    info!("TVDB credentials verified");
    Ok(Some(Arc::new(client)))
}

/// Runs a cycle now and then every `config.interval` until a shutdown
/// signal arrives between cycles or a cycle fails fatally.
async fn schedule(cycle: &BatchCycle, store: &mut JobStore, config: &SyncConfig) -> ProcessExit {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            () = &mut shutdown => {
                info!("Shutdown requested");
                return ProcessExit::Success;
            }
            _ = ticker.tick() => {}
        }

        let result = cycle.run(store).await;
        log_cycle_result(&result);
        if result.is_err() {
            return ProcessExit::Failure;
        }
        info!(hours = config.interval.as_secs() / 3600, "Next cycle scheduled");
    }
}

fn log_cycle_result(result: &Result<CycleOutcome, CycleError>) {
    match result {
        Ok(CycleOutcome::Completed { jobs }) => info!(jobs, "Cycle finished"),
        Ok(CycleOutcome::NoLibraries) => debug!("Cycle had nothing to do"),
        Ok(CycleOutcome::Aborted { completed, error }) => {
            warn!(completed, error = %error, "Cycle stopped early");
        }
        Err(error) => error!(error = %error, "Stopping after fatal error"),
    }
}

async fn flush_state(cycle: &BatchCycle, store: &JobStore) {
    if let Err(error) = cycle.caches().flush_all().await {
        warn!(%error, "Could not save resolution caches on exit");
    }
    if let Err(error) = store.flush().await {
        warn!(%error, "Could not save job state on exit");
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(error) => {
            warn!(%error, "Cannot listen for SIGTERM; only Ctrl-C stops the scheduler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
