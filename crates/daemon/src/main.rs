// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! lifelined - offline delivery and call signaling daemon.
//!
//! Runs as a sidecar of the messaging client. Commands arrive as JSON lines
//! on stdin; replies, notifications, and media instructions leave as JSON
//! lines on stdout. Logs go to `lifelined.log` in the state directory.
//!
//! Usage:
//!   lifelined [--state-dir <path>] [--config <path>] [-v]

mod bridge;
mod config;
mod control;
mod env;
mod error;
mod http;
mod protocol;
mod relay;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use lifeline_core::{
    open_store, Backoff, CacheTierManager, CallManager, ChannelNotifier, Network, OfflineQueue,
    PushDispatcher, Request, RequestPipeline, SyncOrchestrator, SystemClock,
};

use bridge::{HostMedia, LatestStats, Outbox};
use config::{Config, CONFIG_FILE_NAME};
use control::Daemon;
use error::{Error, Result};
use protocol::DaemonEvent;

/// Database filename within the state directory.
const DB_NAME: &str = "lifeline.db";
/// Log filename within the state directory.
const LOG_NAME: &str = "lifelined.log";
/// Lock filename for single instance guarantee.
const LOCK_NAME: &str = "lifelined.lock";

/// Offline delivery and call signaling daemon
#[derive(Parser, Debug)]
#[command(name = "lifelined", version)]
struct Args {
    /// Directory for the database, lock, and log
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Config file (default: <state-dir>/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let state_dir = env::resolve_state_dir(args.state_dir.clone());
    if let Err(e) = fs::create_dir_all(&state_dir) {
        eprintln!("lifelined: cannot create {}: {e}", state_dir.display());
        std::process::exit(1);
    }
    setup_logging(&state_dir.join(LOG_NAME), args.verbose);
    tracing::info!(state_dir = %state_dir.display(), "lifelined starting");

    if let Err(e) = run(args, &state_dir).await {
        tracing::error!(error = %e, "lifelined failed");
        eprintln!("lifelined: {e}");
        std::process::exit(1);
    }
    tracing::info!("lifelined stopped");
}

async fn run(args: Args, state_dir: &Path) -> Result<()> {
    let config_path = args
        .config
        .or_else(env::config_path)
        .unwrap_or_else(|| state_dir.join(CONFIG_FILE_NAME));
    let config = Config::load(&config_path)?;
    let _lock = acquire_lock(&state_dir.join(LOCK_NAME))?;

    let shutdown = CancellationToken::new();
    let store = open_store(&state_dir.join(DB_NAME))?;
    let clock = Arc::new(SystemClock);
    let (notifier, mut notifications) = ChannelNotifier::new();
    let notifier = Arc::new(notifier);
    let network: Arc<dyn Network> = Arc::new(http::HttpNetwork::new(&config)?);

    let (outbox, lines) = Outbox::new();
    let writer = tokio::spawn(bridge::write_lines(lines, tokio::io::stdout()));

    let cache = Arc::new(CacheTierManager::new(
        config.cache.clone(),
        store.clone(),
        network.clone(),
        clock.clone(),
        notifier.clone(),
    ));
    let queue = Arc::new(OfflineQueue::new(store, clock));
    let sync = Arc::new(SyncOrchestrator::new(
        queue.clone(),
        network.clone(),
        notifier.clone(),
        config.sync.clone(),
        shutdown.clone(),
    ));

    let reconnect = Backoff::new(
        Duration::from_millis(100),
        Duration::from_secs(config.relay_reconnect_max_secs),
    );
    let (signaling, relay_client, mut inbound) =
        relay::channel(config.relay_url.clone(), config.peer_id.clone(), reconnect);
    let stats = Arc::new(LatestStats::default());
    let calls = CallManager::new(
        config.peer_id.clone(),
        Arc::new(signaling),
        Arc::new(HostMedia::new(outbox.clone(), stats.clone())),
        stats.clone(),
        notifier,
        config.signaling.clone(),
    );

    cache.activate()?;
    spawn_precache(&config, cache.clone());
    spawn_purge(config.purge_interval(), cache.clone(), shutdown.clone());
    tokio::spawn(sync.clone().run_scheduler());
    tokio::spawn(relay_client.run(shutdown.clone()));
    {
        let calls = calls.clone();
        tokio::spawn(async move {
            while let Some(signal) = inbound.recv().await {
                if let Err(e) = calls.handle_signal(&signal.sender, signal.message).await {
                    tracing::warn!(error = %e, "inbound signal not applied");
                }
            }
        });
    }
    {
        let outbox = outbox.clone();
        tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                outbox.emit(&DaemonEvent::Notification { notification });
            }
        });
    }

    let daemon = Arc::new(Daemon {
        pipeline: RequestPipeline::new(cache.clone(), queue.clone(), network),
        push: PushDispatcher::new(calls.clone(), sync.clone()),
        config,
        cache,
        queue,
        sync,
        calls: calls.clone(),
        stats,
    });

    let interrupt = CancellationToken::new();
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        });
    }

    outbox.emit(&DaemonEvent::Ready {
        version: env!("CARGO_PKG_VERSION").to_string(),
    });
    control::serve(
        daemon,
        BufReader::new(tokio::io::stdin()),
        outbox.clone(),
        interrupt,
    )
    .await;

    tracing::info!("shutting down");
    calls.shutdown().await;
    shutdown.cancel();
    drop(outbox);
    // The writer ends once every outbox clone held by background tasks is gone;
    // give it a moment to flush what is already queued.
    let _ = tokio::time::timeout(Duration::from_secs(2), writer).await;
    Ok(())
}

/// Warms the static tier with the shell routes in the background.
fn spawn_precache(config: &Config, cache: Arc<CacheTierManager>) {
    let requests: Vec<Request> = config
        .cache
        .shell_routes
        .iter()
        .filter_map(|route| match config.resolve_url(route) {
            Ok(url) => Some(Request::get(url)),
            Err(e) => {
                tracing::warn!(%route, error = %e, "skipping shell route");
                None
            }
        })
        .collect();
    tokio::spawn(async move {
        match cache.precache(&requests).await {
            Ok(stored) => tracing::info!(stored, "shell precached"),
            Err(e) => tracing::warn!(error = %e, "precache incomplete, will fill on demand"),
        }
    });
}

fn spawn_purge(every: Duration, cache: Arc<CacheTierManager>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = cache.purge_expired() {
                tracing::warn!(error = %e, "cache purge failed");
            }
        }
    });
}

fn setup_logging(log_path: &Path, verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stdout carries the line protocol; logs go to the file or stderr.
    if let Ok(file) = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
    {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(file)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn acquire_lock(lock_path: &Path) -> Result<fs::File> {
    use fs2::FileExt;

    let file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(lock_path)?;
    file.try_lock_exclusive()
        .map_err(|_| Error::AlreadyRunning)?;
    Ok(file)
}
