// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lathe Daemon (lathed)
//!
//! Background process that owns the broker, the result backend, the
//! shared store, and the worker pool.
//!
//! Architecture:
//! - Listener task: socket I/O, one spawned task per connection
//! - Worker tasks: pull-execute-ack loops over the configured queues
//! - Sweeper task: periodic result-TTL sweep

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use fs2::FileExt;
use lathe_daemon::env::PoolType;
use lathe_daemon::{Config, DaemonCtx, Listener};
use lathe_engine::{
    recover_crashed, Broker, Executor, ExecutorConfig, KernelSession, LicenseSettings,
    RevocationRegistry, Worker, WorkerConfig, WorkerError, LICENSE_EXIT_CODE,
};
use lathe_runner::CancelFlag;
use lathe_storage::{LocalBackend, ResultBackend, SharedStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

/// Cadence of the result-TTL sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("lathed {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("lathed {}", env!("CARGO_PKG_VERSION"));
                println!("Lathe Daemon - owns the job queues and the worker pool");
                println!();
                println!("USAGE:");
                println!("    lathed");
                println!();
                println!("The daemon is typically started by the `lathe` CLI. It listens");
                println!("on a unix socket; configuration comes from LATHE_* environment");
                println!("variables (see lathe.toml for file-based defaults).");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: lathed [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load()?;
    let _log_guard = setup_logging(&config)?;
    info!(version = env!("CARGO_PKG_VERSION"), "starting lathed");

    // Single-instance lock
    if let Some(parent) = config.lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let lock_file = std::fs::File::create(&config.lock_path)?;
    if lock_file.try_lock_exclusive().is_err() {
        eprintln!("lathed is already running");
        std::process::exit(1);
    }

    let store = SharedStore::open(&config.share_path)?;
    let local_backend = Arc::new(LocalBackend::open(&config.spool_path, config.result_ttl)?);
    let backend: Arc<dyn ResultBackend> = Arc::clone(&local_backend) as Arc<dyn ResultBackend>;
    let broker = Arc::new(Broker::new());
    let revocations = Arc::new(RevocationRegistry::new());
    let shutdown = Arc::new(CancelFlag::new());

    let session = Arc::new(KernelSession::new(LicenseSettings {
        host: config.license_host.clone(),
        port: config.license_port,
        acquire_at_start: config.license_acquire_at_start,
        flexlm: config.license_flexlm,
        disabled: config.disable_kernel,
    }));

    // Close the loop on any task a previous worker generation died under.
    std::fs::create_dir_all(&config.beacon_dir)?;
    match recover_crashed(&config.beacon_dir, backend.as_ref()) {
        Ok(recovered) if !recovered.is_empty() => {
            warn!(count = recovered.len(), "recovered crashed tasks from beacons")
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "beacon recovery failed"),
    }

    let executor = Arc::new(Executor::new(
        store.clone(),
        Arc::clone(&backend),
        Arc::clone(&broker),
        Arc::clone(&session),
        Arc::clone(&revocations),
        ExecutorConfig {
            default_time_limit: config.time_limit,
            retry_time_limit: config.retry_time_limit,
            cleanup_enabled: config.cleanup_enabled,
            cleanup_delay: config.cleanup_delay,
            max_memory_mb: config.max_memory_mb,
            ..ExecutorConfig::default()
        },
        lathe_core::SystemClock,
    ));

    // Worker pool: solo runs one loop, threads runs `concurrent_tasks`.
    let worker_count = match config.pool {
        PoolType::Solo => 1,
        PoolType::Threads => config.concurrent_tasks.max(1),
    };
    let mut worker_handles = Vec::new();
    for n in 0..worker_count {
        let worker = Worker::new(
            Arc::clone(&executor),
            Arc::clone(&broker),
            Arc::clone(&session),
            WorkerConfig {
                queues: config.queues.clone(),
                max_tasks: config.max_tasks_before_shutdown,
                beacon_dir: config.beacon_dir.clone(),
            },
            Arc::clone(&shutdown),
        );
        worker_handles.push(tokio::spawn(async move {
            let result = worker.run().await;
            if let Err(WorkerError::License(_)) = &result {
                error!(worker = n, "worker exiting with license failure");
            }
            result
        }));
    }

    // Result-TTL sweeper
    {
        let local_backend = Arc::clone(&local_backend);
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = local_backend.sweep() {
                            warn!(error = %e, "result sweep failed");
                        }
                    }
                    _ = shutdown.cancelled_wait() => break,
                }
            }
        });
    }

    // Socket listener
    let _ = std::fs::remove_file(&config.socket_path);
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let socket = UnixListener::bind(&config.socket_path)?;
    info!(socket = %config.socket_path.display(), queues = ?config.queues, "listening");

    let ctx = Arc::new(DaemonCtx {
        store,
        backend,
        broker: Arc::clone(&broker),
        revocations,
        shutdown: Arc::clone(&shutdown),
        config: config.clone(),
    });
    let listener_handle = tokio::spawn(Listener::new(socket, Arc::clone(&ctx)).run());

    // Signals: SIGINT/SIGTERM drain and stop.
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received"),
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = shutdown.cancelled_wait() => info!("shutdown requested"),
    }

    broker.close();
    shutdown.cancel();

    let mut license_fatal = false;
    for handle in worker_handles {
        match handle.await {
            Ok(Err(WorkerError::License(_))) => license_fatal = true,
            Ok(Ok(())) => {}
            Err(e) => warn!(error = %e, "worker task panicked"),
        }
    }
    listener_handle.abort();
    let _ = std::fs::remove_file(&config.socket_path);

    if license_fatal {
        std::process::exit(LICENSE_EXIT_CODE);
    }
    info!("lathed stopped");
    Ok(())
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, Box<dyn std::error::Error>> {
    use tracing_subscriber::EnvFilter;

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}
