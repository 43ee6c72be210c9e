//! vigil-reporter - standalone heartbeat sender for the primary host.
//!
//! The streaming worker maintains a small JSON status file; this binary
//! polls it and posts heartbeats to the monitor. A missing or corrupt
//! status file is itself a signal: the monitor then sees
//! `streamingActive: false` with an explanatory error instead of silence.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil_reporter::{PrimarySnapshot, Reporter, ReporterConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "vigil_reporter=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = config_from_env()?;
    let status_file = status_file_from_env();
    info!("[*] vigil-reporter v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "[>] monitor {} | status file {}",
        config.endpoint,
        status_file.display()
    );

    let cancel = CancellationToken::new();
    let (state_tx, state_rx) = watch::channel(read_status_file(&status_file));

    // Poll the worker's status file at half the report cadence so the
    // reporter always posts a reasonably fresh snapshot.
    let poll_interval = (config.interval / 2).max(Duration::from_secs(1));
    let poller_cancel = cancel.clone();
    let poller = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = poller_cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let snapshot = read_status_file(&status_file);
            if *state_tx.borrow() != snapshot {
                debug!("primary status changed: {snapshot:?}");
            }
            let _ = state_tx.send(snapshot);
        }
    });

    let reporter = Reporter::new(config, state_rx);
    let reporter_handle = tokio::spawn(reporter.run(cancel.clone()));

    shutdown_signal().await;
    info!("[*] shutting down");
    cancel.cancel();
    let _ = reporter_handle.await;
    let _ = poller.await;
    Ok(())
}

fn config_from_env() -> Result<ReporterConfig> {
    let endpoint = std::env::var("VIGIL_MONITOR_URL")
        .context("VIGIL_MONITOR_URL is required (e.g. http://monitor:8080/status)")?;
    let mut config = ReporterConfig::new(endpoint);

    config.token = std::env::var("VIGIL_TOKEN").ok().filter(|t| !t.is_empty());
    config.interval = env_secs("VIGIL_REPORT_INTERVAL_SECONDS", config.interval);
    config.timeout = env_secs("VIGIL_REPORT_TIMEOUT_SECONDS", config.timeout);
    config.max_backoff = env_secs("VIGIL_MAX_BACKOFF_SECONDS", config.max_backoff);
    Ok(config)
}

fn status_file_from_env() -> PathBuf {
    std::env::var("VIGIL_PRIMARY_STATUS_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/run/vigil/primary-status.json"))
}

fn env_secs(key: &str, default: Duration) -> Duration {
    match std::env::var(key) {
        Err(_) => default,
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(value) if value > 0 => Duration::from_secs(value),
            _ => {
                warn!("{key}={raw:?} is not a positive number; using {}s", default.as_secs());
                default
            }
        },
    }
}

/// Read the worker's status file; absence or corruption reports the worker
/// as down rather than silencing the heartbeat.
fn read_status_file(path: &std::path::Path) -> PrimarySnapshot {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<PrimarySnapshot>(&content) {
            Ok(snapshot) => snapshot,
            Err(err) => PrimarySnapshot {
                streaming_active: false,
                last_error: Some(format!("status file unparsable: {err}")),
                ..Default::default()
            },
        },
        Err(err) => PrimarySnapshot {
            streaming_active: false,
            last_error: Some(format!("status file unreadable: {err}")),
            ..Default::default()
        },
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_status_file_reports_the_worker_down() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = read_status_file(&dir.path().join("absent.json"));
        assert!(!snapshot.streaming_active);
        assert!(snapshot.last_error.unwrap().contains("unreadable"));
    }

    #[test]
    fn corrupt_status_file_reports_the_worker_down() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        std::fs::write(&path, "{oops").unwrap();

        let snapshot = read_status_file(&path);
        assert!(!snapshot.streaming_active);
        assert!(snapshot.last_error.unwrap().contains("unparsable"));
    }

    #[test]
    fn valid_status_file_is_taken_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        std::fs::write(
            &path,
            r#"{"streamingActive": true, "ffmpegRunning": true, "dayWindowActive": true}"#,
        )
        .unwrap();

        let snapshot = read_status_file(&path);
        assert!(snapshot.streaming_active);
        assert!(snapshot.ffmpeg_running);
        assert!(snapshot.day_window_active);
        assert!(snapshot.last_error.is_none());
    }
}
