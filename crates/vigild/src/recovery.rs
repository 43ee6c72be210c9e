//! Broadcast recovery hints.
//!
//! When the primary comes back, the platform sometimes needs a nudge before
//! it switches from the backup ingest to the primary one. The decision loop
//! enqueues one hint per recovery transition; this worker runs the platform
//! probe with its own cooldown so a flapping primary cannot hammer the API.
//! Probe failures are logged and forgotten; the next recovery will retry.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_common::{ApiClient, BroadcastProbe, PlatformError};

#[derive(Debug, Clone)]
pub struct RecoveryProbeConfig {
    pub api_base: String,
    pub token_file: PathBuf,
    pub stream_id: Option<String>,
    pub cooldown: Duration,
}

/// Spawn the worker; the returned sender carries one unit per recovery
/// transition. Capacity 1: a pending hint makes further ones redundant.
pub fn spawn(config: RecoveryProbeConfig, cancel: CancellationToken) -> mpsc::Sender<()> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(run(config, rx, cancel));
    tx
}

async fn run(config: RecoveryProbeConfig, mut rx: mpsc::Receiver<()>, cancel: CancellationToken) {
    let client = ApiClient::new(config.api_base.clone());
    let mut last_probe: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            request = rx.recv() => {
                if request.is_none() {
                    break;
                }
            }
        }

        let Some(stream_id) = config.stream_id.as_deref() else {
            debug!("no stream id configured; recovery hint skipped");
            continue;
        };

        if let Some(at) = last_probe {
            let elapsed = at.elapsed();
            if elapsed < config.cooldown {
                debug!(
                    "recovery hint cooldown: {:.0}s remaining",
                    (config.cooldown - elapsed).as_secs_f64()
                );
                continue;
            }
        }
        last_probe = Some(Instant::now());

        match client.probe_broadcasts(&config.token_file, stream_id).await {
            Ok(probe) if probe.ready_for_ingest() => {
                if let BroadcastProbe::Eligible {
                    broadcast_id,
                    lifecycle,
                    ..
                } = &probe
                {
                    info!(
                        "recovery hint: broadcast {broadcast_id} ({lifecycle}) is bound to {stream_id}"
                    );
                }
            }
            Ok(BroadcastProbe::NoBroadcast) => {
                warn!("recovery hint: no active or upcoming broadcast on the channel");
            }
            Ok(BroadcastProbe::WrongBinding { broadcasts_seen }) => {
                warn!(
                    "recovery hint: {broadcasts_seen} broadcast(s) found but none bound to {stream_id}"
                );
            }
            Ok(probe) => {
                warn!("recovery hint: broadcast not ready for ingest ({probe:?})");
            }
            Err(err @ PlatformError::InvalidToken(_)) => {
                warn!("recovery hint skipped: {err}; refresh the OAuth credential file");
            }
            Err(err) => {
                warn!("recovery hint failed: {err}");
            }
        }
    }
    debug!("recovery worker stopped");
}
