//! vigild - heartbeat monitor for the stream fallback controller.
//!
//! Receives periodic status reports from the primary encoder host, decides
//! with hysteresis whether the primary is alive, and drives the slate
//! encoder unit so the channel never goes dark. On recovery it nudges the
//! video platform to re-check the primary broadcast binding.

use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use vigild::camera::CameraPinger;
use vigild::config::MonitorConfig;
use vigild::decider::{Decider, DeciderConfig, DecisionLoop};
use vigild::recovery::{self, RecoveryProbeConfig};
use vigild::server::{self, AppState, EngineView};
use vigild::service::ServiceController;
use vigild::store::{self, HeartbeatStore};

/// How long in-flight work gets on shutdown before the process exits anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_hook();
    init_tracing()?;

    let config = MonitorConfig::from_env();

    info!("[*] vigild v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "[>] outage threshold {}s, tick {}s, recovery after {} healthy report(s), cooldown {}s",
        config.missed_threshold.as_secs(),
        config.check_interval.as_secs(),
        config.recovery_reports,
        config.cooldown.as_secs()
    );
    if config.token.is_some() {
        info!("[>] bearer authentication enforced on /status");
    }
    if let Some(path) = &config.log_file {
        info!("[>] mirroring logs to {}", path.display());
    }

    let cancel = CancellationToken::new();

    // Record store + persistence flusher.
    let store = Arc::new(HeartbeatStore::load(
        &config.state_file,
        config.history_window,
        config.max_records,
    ));
    let flush_handle = tokio::spawn(store::run_flush_worker(
        config.state_file.clone(),
        store.subscribe(),
        cancel.clone(),
    ));

    // Optional secondary-side camera pinger.
    let ping_rx = if config.camera_ping_enabled {
        match &config.camera_ping_host {
            Some(host) => Some(
                CameraPinger::new(host.clone(), config.camera_ping_interval)
                    .spawn(cancel.clone()),
            ),
            None => {
                warn!("VIGIL_CAMERA_PING_ENABLED is set without VIGIL_CAMERA_PING_HOST; pinger disabled");
                None
            }
        }
    } else {
        None
    };

    // Broadcast recovery worker.
    let recovery_tx = recovery::spawn(
        RecoveryProbeConfig {
            api_base: config.api_base.clone(),
            token_file: config.oauth_token_file.clone(),
            stream_id: config.stream_id.clone(),
            cooldown: config.recovery_hint_cooldown,
        },
        cancel.clone(),
    );

    // Seed the engine from the unit's observed state so a monitor restart
    // does not fight a slate that is already on air.
    let controller = ServiceController::new(config.secondary_unit.clone());
    let fallback_active = controller.is_active().await;
    if fallback_active {
        info!("[>] unit {} is already active at startup", controller.unit());
    }

    let engine_view = Arc::new(RwLock::new(EngineView {
        fallback_active,
        ..Default::default()
    }));

    let decision_loop = DecisionLoop {
        store: Arc::clone(&store),
        controller,
        decider: Decider::new(
            DeciderConfig {
                missed_threshold: config.missed_threshold,
                recovery_reports: config.recovery_reports,
                cooldown: config.cooldown,
            },
            fallback_active,
        ),
        engine_view: Arc::clone(&engine_view),
        recovery_tx: Some(recovery_tx),
        ping_rx,
        mode_file: config.mode_file.clone(),
        check_interval: config.check_interval,
    };
    let decision_handle = tokio::spawn(decision_loop.run(cancel.clone()));

    // HTTP ingress.
    let state = Arc::new(AppState::new(
        Arc::clone(&store),
        engine_view,
        config.token.clone(),
        config.require_token,
    ));
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(err) = server::run(state, &config.bind, config.port, server_cancel.clone()).await
        {
            warn!("http server failed: {err:#}");
            server_cancel.cancel();
        }
    });

    wait_for_shutdown_signal().await;
    info!("[*] shutdown requested; draining");
    cancel.cancel();

    let drain = async {
        let _ = server_handle.await;
        let _ = decision_handle.await;
        let _ = flush_handle.await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("shutdown grace of {}s expired; exiting anyway", SHUTDOWN_GRACE.as_secs());
    }
    info!("[*] vigild stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!("could not register SIGTERM handler: {err}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received"),
        result = tokio::signal::ctrl_c() => {
            if result.is_ok() {
                info!("SIGINT received");
            }
        }
    }
}

/// The log file target is read straight from the environment: the
/// subscriber must exist before the config loader runs, or the loader's own
/// warnings would be lost.
fn init_tracing() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "vigild=info,vigil_common=info".into()),
    );

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_file = std::env::var("VIGIL_LOG_FILE")
        .ok()
        .filter(|p| !p.is_empty())
        .map(std::path::PathBuf::from);
    let file_layer = match &log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer.map(|layer| layer.boxed()))
        .init();
    Ok(())
}

fn setup_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };

        eprintln!();
        eprintln!("[!!!] PANIC in vigild");
        eprintln!("[!!!] Location: {location}");
        eprintln!("[!!!] Message: {message}");
        eprintln!();

        default_hook(panic_info);
    }));
}
