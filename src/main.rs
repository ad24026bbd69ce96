//! kawana - in-memory IP reputation tracker.
//!
//! Startup wiring: parse flags, build the runtime, load the snapshot, spawn
//! the background loops (persist, backup, metrics), then serve commands
//! until a shutdown signal lands. Any initialization failure exits
//! non-zero; a corrupt snapshot must never be silently discarded.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kawana::config::Config;
use kawana::network::Gateway;
use kawana::store::backup::S3Backup;
use kawana::store::IpStore;
use kawana::{http, metrics};

fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        data_dir = %config.data_dir.display(),
        persist_interval = config.persist_interval,
        backup_interval = config.backup_interval,
        procs = config.procs,
        "kawana starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.procs.max(1))
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    metrics::init();

    // Fail fast on a broken backup target before touching anything else.
    let backup = if config.backup_interval > 0 {
        let backup = S3Backup::connect(&config.s3_bucket).await.map_err(|e| {
            error!(error = %e, "backup misconfigured");
            anyhow::anyhow!(e)
        })?;
        Some(backup)
    } else {
        None
    };

    let store = Arc::new(IpStore::open(&config.data_dir).map_err(|e| {
        error!(error = %e, data_dir = %config.data_dir.display(), "failed to open data store");
        anyhow::anyhow!(e)
    })?);

    metrics::spawn_sampler(Arc::clone(&store));
    spawn_persist_loop(Arc::clone(&store), config.persist_interval);
    if let Some(backup) = backup {
        spawn_backup_loop(backup, store.snapshot_path(), config.backup_interval);
    }
    tokio::spawn(http::run_http_server(config.metrics_port));

    let gateway = Gateway::bind(config.port, Arc::clone(&store)).await?;

    tokio::select! {
        result = gateway.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    // Flush a final snapshot so the disk matches what clients last saw.
    let final_store = Arc::clone(&store);
    tokio::task::spawn_blocking(move || final_store.persist()).await??;

    info!("kawana shut down");
    Ok(())
}

/// Persist the store every `interval_secs` seconds. 0 disables the loop.
fn spawn_persist_loop(store: Arc<IpStore>, interval_secs: u64) {
    if interval_secs == 0 {
        return;
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            info!("starting background snapshot");
            let started = Instant::now();

            let store = Arc::clone(&store);
            match tokio::task::spawn_blocking(move || store.persist()).await {
                Ok(Ok(())) => {
                    metrics::record_snapshot("ok", started.elapsed().as_secs_f64());
                    info!(elapsed = ?started.elapsed(), "background snapshot finished");
                }
                Ok(Err(e)) => {
                    metrics::record_snapshot("error", started.elapsed().as_secs_f64());
                    error!(error = %e, "background snapshot failed");
                }
                Err(e) => {
                    error!(error = %e, "snapshot task panicked");
                }
            }
        }
    });
}

/// Upload the snapshot file every `interval_secs` seconds. 0 disables.
fn spawn_backup_loop(backup: S3Backup, snapshot: PathBuf, interval_secs: u64) {
    if interval_secs == 0 {
        return;
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            info!(bucket = backup.bucket(), "starting backup");
            match backup.upload(&snapshot).await {
                Ok(()) => {
                    metrics::record_backup("ok");
                    info!("backup finished");
                }
                Err(e) => {
                    metrics::record_backup("error");
                    error!(error = %e, "backup failed");
                }
            }
        }
    });
}
