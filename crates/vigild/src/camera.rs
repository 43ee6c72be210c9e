//! Secondary-side camera reachability probing.
//!
//! The primary already reports its own camera ping, but when the primary is
//! half-dead its word is worth little. With `cameraPingEnabled` the monitor
//! pings the camera host itself and the decision engine uses an explicit
//! failure to downgrade the reported reachability.

use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Latest probe result, published over a watch channel.
#[derive(Debug, Clone, Default)]
pub struct PingStatus {
    pub reachable: Option<bool>,
    pub rtt_ms: Option<f64>,
    pub last_error: Option<String>,
    pub checked_at: Option<DateTime<Utc>>,
}

/// Per-probe deadline; a camera that takes longer than this to answer a
/// ping is unreachable for our purposes.
const PING_DEADLINE: Duration = Duration::from_secs(3);

pub struct CameraPinger {
    host: String,
    interval: Duration,
}

impl CameraPinger {
    pub fn new(host: impl Into<String>, interval: Duration) -> Self {
        Self {
            host: host.into(),
            interval,
        }
    }

    /// Spawn the probe loop; the receiver always holds the latest status.
    pub fn spawn(self, cancel: CancellationToken) -> watch::Receiver<PingStatus> {
        let (tx, rx) = watch::channel(PingStatus::default());
        tokio::spawn(async move {
            info!(
                "camera pinger watching {} every {}s",
                self.host,
                self.interval.as_secs()
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let status = self.probe_once().await;
                match status.reachable {
                    Some(true) => debug!(
                        "camera {} reachable ({})",
                        self.host,
                        status
                            .rtt_ms
                            .map(|ms| format!("{ms:.1} ms"))
                            .unwrap_or_else(|| "no rtt".into())
                    ),
                    Some(false) => warn!(
                        "camera {} unreachable: {}",
                        self.host,
                        status.last_error.as_deref().unwrap_or("no detail")
                    ),
                    None => {}
                }
                let _ = tx.send(status);
            }
        });
        rx
    }

    async fn probe_once(&self) -> PingStatus {
        let output = Command::new("ping")
            .args(["-n", "-c", "1", "-W", "2"])
            .arg(&self.host)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let checked_at = Some(Utc::now());
        match tokio::time::timeout(PING_DEADLINE, output).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                if output.status.success() {
                    PingStatus {
                        reachable: Some(true),
                        rtt_ms: parse_rtt_ms(&stdout),
                        last_error: None,
                        checked_at,
                    }
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let detail = stderr.trim();
                    let detail = if detail.is_empty() {
                        stdout.trim()
                    } else {
                        detail
                    };
                    PingStatus {
                        reachable: Some(false),
                        rtt_ms: None,
                        last_error: Some(if detail.is_empty() {
                            format!("ping exited with {:?}", output.status.code())
                        } else {
                            detail.to_string()
                        }),
                        checked_at,
                    }
                }
            }
            Ok(Err(err)) => PingStatus {
                // No usable ping binary: unknown, not unreachable.
                reachable: None,
                rtt_ms: None,
                last_error: Some(format!("ping unavailable: {err}")),
                checked_at,
            },
            Err(_) => PingStatus {
                reachable: Some(false),
                rtt_ms: None,
                last_error: Some(format!("timeout after {}s", PING_DEADLINE.as_secs())),
                checked_at,
            },
        }
    }
}

/// Pull the first `time=<ms>` figure out of ping output.
fn parse_rtt_ms(output: &str) -> Option<f64> {
    for line in output.lines() {
        if let Some(idx) = line.find("time=").or_else(|| line.find("time<")) {
            let tail = &line[idx + 5..];
            let token: String = tail
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            if let Ok(value) = token.parse::<f64>() {
                return Some(value);
            }
        }
    }
    None
}
