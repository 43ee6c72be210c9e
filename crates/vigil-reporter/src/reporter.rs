//! The send loop.

use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::snapshot::PrimarySnapshot;

#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Full URL of the monitor's status endpoint.
    pub endpoint: String,
    pub token: Option<String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub max_backoff: Duration,
}

impl ReporterConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: None,
            interval: Duration::from_secs(20),
            timeout: Duration::from_secs(5),
            max_backoff: Duration::from_secs(120),
        }
    }
}

/// What one delivery attempt came back as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    /// The monitor rejected our token. Not a transport problem: keep the
    /// normal cadence, an operator has to fix the token anyway.
    AuthRejected,
    /// HTTP reached the monitor but it answered outside 2xx.
    Refused(StatusCode),
    /// The request never completed.
    Transport(String),
}

impl Delivery {
    /// Whether this result advances the backoff.
    pub fn backs_off(&self) -> bool {
        matches!(self, Delivery::Refused(_) | Delivery::Transport(_))
    }
}

pub struct Reporter {
    config: ReporterConfig,
    client: reqwest::Client,
    state_rx: watch::Receiver<PrimarySnapshot>,
    backoff: Backoff,
}

impl Reporter {
    pub fn new(config: ReporterConfig, state_rx: watch::Receiver<PrimarySnapshot>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build HTTP client");
        let backoff = Backoff::new(config.interval, config.max_backoff);
        Self {
            config,
            client,
            state_rx,
            backoff,
        }
    }

    /// Run until cancelled. Never panics, never blocks the state publisher.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "heartbeat reporter posting to {} every {}s",
            self.config.endpoint,
            self.config.interval.as_secs()
        );

        let mut delay = Duration::ZERO;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let snapshot = self.state_rx.borrow().clone();
            let delivery = self.send_once(snapshot).await;
            delay = match &delivery {
                Delivery::Accepted => {
                    self.backoff.reset();
                    self.config.interval
                }
                Delivery::AuthRejected => {
                    warn!("monitor rejected the bearer token; check the configured secret");
                    self.config.interval
                }
                Delivery::Refused(status) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        "monitor answered {status}; retrying in {:.0}s",
                        delay.as_secs_f64()
                    );
                    delay
                }
                Delivery::Transport(err) => {
                    let delay = self.backoff.next_delay();
                    warn!("heartbeat failed: {err}; retrying in {:.0}s", delay.as_secs_f64());
                    delay
                }
            };
        }
        info!("heartbeat reporter stopped");
    }

    async fn send_once(&self, snapshot: PrimarySnapshot) -> Delivery {
        let report = snapshot.into_report();
        let mut request = self.client.post(&self.config.endpoint).json(&report);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    debug!("heartbeat accepted ({status})");
                    Delivery::Accepted
                } else if status == StatusCode::UNAUTHORIZED {
                    Delivery::AuthRejected
                } else {
                    Delivery::Refused(status)
                }
            }
            Err(err) => Delivery::Transport(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_class_failures_back_off() {
        assert!(!Delivery::Accepted.backs_off());
        assert!(!Delivery::AuthRejected.backs_off());
        assert!(Delivery::Refused(StatusCode::INTERNAL_SERVER_ERROR).backs_off());
        assert!(Delivery::Transport("connection refused".into()).backs_off());
    }
}
