//! vigil-slate - keeps the backup ingest fed with a placeholder stream.
//!
//! Long-lived runner started and restarted by the service manager. It
//! resolves the encoder profile, picks the slate mode from the mode file,
//! then rotates through the configured scenes forever, supervising one
//! encoder child at a time. Termination signals are forwarded to the child
//! and re-raised as the runner's own exit code so the service manager
//! records the real cause.

mod encoder;
mod profile;
mod progress;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_common::ingest;

use crate::encoder::{resolve_scene, run_scene, SceneEnd, TermSignals};
use crate::profile::EncoderProfile;

/// Cadence of the stable progress file.
const PROGRESS_PERIOD: Duration = Duration::from_secs(30);

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "vigil_slate=info,vigil_common=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    match runtime.block_on(run()) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            // Configuration problems land here; a non-zero exit makes the
            // service manager surface them instead of looping silently.
            error!("fatal: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let profile_path = std::env::var("VIGIL_SLATE_ENV")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/vigil/slate.env"));
    let profile = EncoderProfile::from_env_file(&profile_path)?;

    let mode = ingest::read_mode_file(&profile.mode_file, profile.default_mode);
    info!("[*] vigil-slate v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "[>] mode {}, {} scene(s), {}s per scene, target {}",
        mode.as_str(),
        profile.scenes.len(),
        profile.scene_duration.as_secs(),
        redact_key(&profile.target_url, &profile.stream_key),
    );

    let mut signals = TermSignals::install()?;

    let cancel = CancellationToken::new();
    let raw_progress = profile.progress_file.with_extension("raw");
    let ticker = tokio::spawn(progress::run_ticker(
        raw_progress.clone(),
        profile.progress_file.clone(),
        PROGRESS_PERIOD,
        cancel.clone(),
    ));

    if !profile.start_delay.is_zero() {
        info!("[>] holding {}s before first launch", profile.start_delay.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(profile.start_delay) => {}
            signal = signals.recv() => {
                cancel.cancel();
                let _ = ticker.await;
                return Ok(128 + signal as i32);
            }
        }
    }

    let mut exit_code = 0;
    'rotation: loop {
        for entry in &profile.scenes {
            let scene = resolve_scene(&profile, entry, mode);
            match run_scene(&profile, &scene, &raw_progress, &mut signals).await {
                Ok(SceneEnd::Rotated) => {}
                Ok(SceneEnd::Died) => {
                    info!(
                        "waiting {}s before the next scene",
                        profile.retry_delay.as_secs()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(profile.retry_delay) => {}
                        signal = signals.recv() => {
                            exit_code = 128 + signal as i32;
                            break 'rotation;
                        }
                    }
                }
                Ok(SceneEnd::Signalled(signo)) => {
                    exit_code = 128 + signo;
                    break 'rotation;
                }
                Err(err) => {
                    // Spawn failures (missing binary and the like) are not
                    // retryable from inside; bail out loudly.
                    return Err(err);
                }
            }
        }
    }

    cancel.cancel();
    let _ = ticker.await;
    info!("[*] vigil-slate exiting with code {exit_code}");
    Ok(exit_code)
}

/// Keep stream keys out of the logs.
fn redact_key(url: &str, key: &str) -> String {
    url.replace(key, "***")
}
