//! The decision engine: hysteresis over the heartbeat store.
//!
//! The engine itself is deterministic. It looks at a store snapshot, the
//! latest camera ping result and an explicit monotonic `now`, and produces a
//! directive. The driver applies the directive through the service
//! controller and only commits the transition when the service operation
//! succeeded; a failed systemctl call leaves the engine state untouched so
//! the next tick simply tries again.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vigil_common::{ingest, FallbackMode, HeartbeatRecord};

use crate::camera::PingStatus;
use crate::server::EngineView;
use crate::service::ServiceController;
use crate::store::HeartbeatStore;

#[derive(Debug, Clone)]
pub struct DeciderConfig {
    pub missed_threshold: Duration,
    pub recovery_reports: u32,
    pub cooldown: Duration,
}

/// Why the fallback is (or should be) on air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutageReason {
    /// The primary went silent.
    NoHeartbeats,
    /// The primary is reporting, but both camera indicators are hard-false.
    CameraFailure,
}

impl OutageReason {
    /// Slate mode shown for this outage class: a lively synthetic scene for
    /// a silent primary, bars for a known-dead camera.
    pub fn mode(self) -> FallbackMode {
        match self {
            OutageReason::NoHeartbeats => FallbackMode::Life,
            OutageReason::CameraFailure => FallbackMode::Smpte,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            OutageReason::NoHeartbeats => "no heartbeats",
            OutageReason::CameraFailure => "camera failure",
        }
    }
}

/// What the engine wants done this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Keep,
    Start { reason: OutageReason },
    /// The fallback is already up but the outage class changed; the unit is
    /// bounced so the slate picks up the new mode.
    Restart { reason: OutageReason },
    Stop,
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Keep => write!(f, "keep"),
            Directive::Start { reason } => write!(f, "start fallback ({})", reason.describe()),
            Directive::Restart { reason } => write!(f, "restart fallback ({})", reason.describe()),
            Directive::Stop => write!(f, "stop fallback"),
        }
    }
}

/// Derived controller state, exposed for inspection.
#[derive(Debug, Clone)]
pub struct ControllerState {
    pub fallback_active: bool,
    pub consecutive_healthy: u32,
    pub last_transition_at: Option<Instant>,
    pub cooldown_until: Option<Instant>,
}

pub struct Decider {
    cfg: DeciderConfig,
    state: ControllerState,
    outage_reason: Option<OutageReason>,
    /// Next record sequence number that has not been counted yet.
    counted_seq: u64,
    /// Highest sequence seen so far, if any records were ever observed.
    latest_seq: Option<u64>,
    last_decision: String,
    decided_at: DateTime<Utc>,
}

impl Decider {
    /// `fallback_active` seeds the state from the observed unit state at
    /// startup, so a monitor restart does not fight a slate that is already
    /// on air.
    pub fn new(cfg: DeciderConfig, fallback_active: bool) -> Self {
        Self {
            cfg,
            state: ControllerState {
                fallback_active,
                consecutive_healthy: 0,
                last_transition_at: None,
                cooldown_until: None,
            },
            outage_reason: fallback_active.then_some(OutageReason::NoHeartbeats),
            counted_seq: 0,
            latest_seq: None,
            last_decision: "startup".into(),
            decided_at: Utc::now(),
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn last_decision(&self) -> &str {
        &self.last_decision
    }

    pub fn decided_at(&self) -> DateTime<Utc> {
        self.decided_at
    }

    /// One evaluation pass. Pure with respect to its inputs; never touches
    /// the service manager.
    pub fn evaluate(
        &mut self,
        records: &[HeartbeatRecord],
        ping_reachable: Option<bool>,
        now: Instant,
    ) -> Directive {
        if let Some(last) = records.last() {
            self.latest_seq = Some(last.seq);
        }

        if self.state.fallback_active {
            for record in records.iter().filter(|r| r.seq >= self.counted_seq) {
                if report_is_healthy(record, ping_reachable) {
                    self.state.consecutive_healthy += 1;
                } else {
                    self.state.consecutive_healthy = 0;
                }
            }
            if let Some(last) = records.last() {
                self.counted_seq = last.seq + 1;
            }
        }

        let latest = records.last();
        let fresh = latest
            .map(|r| r.age(now) <= self.cfg.missed_threshold)
            .unwrap_or(false);
        let hard_fail = latest
            .map(|r| hard_camera_failure(r, ping_reachable))
            .unwrap_or(false);

        let wanted = if !self.state.fallback_active {
            if latest.is_none() {
                self.note("no heartbeats on record; primary treated as absent");
                Directive::Start {
                    reason: OutageReason::NoHeartbeats,
                }
            } else if !fresh {
                self.note(format!(
                    "last heartbeat is {:.0}s old (threshold {}s)",
                    latest.map(|r| r.age(now).as_secs_f64()).unwrap_or(0.0),
                    self.cfg.missed_threshold.as_secs()
                ));
                Directive::Start {
                    reason: OutageReason::NoHeartbeats,
                }
            } else if hard_fail {
                self.note("heartbeats arriving but camera signal and network are both down");
                Directive::Start {
                    reason: OutageReason::CameraFailure,
                }
            } else {
                self.note("primary healthy");
                Directive::Keep
            }
        } else if self.state.consecutive_healthy >= self.cfg.recovery_reports && fresh && !hard_fail
        {
            self.note(format!(
                "{} consecutive healthy report(s); primary recovered",
                self.state.consecutive_healthy
            ));
            Directive::Stop
        } else if fresh && hard_fail && self.outage_reason == Some(OutageReason::NoHeartbeats) {
            self.note("outage class changed to camera failure; slate switches to bars");
            Directive::Restart {
                reason: OutageReason::CameraFailure,
            }
        } else {
            self.note(format!(
                "fallback active ({}); {}/{} healthy report(s) towards recovery",
                self.outage_reason
                    .map(OutageReason::describe)
                    .unwrap_or("unknown reason"),
                self.state.consecutive_healthy,
                self.cfg.recovery_reports
            ));
            Directive::Keep
        };

        if wanted != Directive::Keep {
            if let Some(until) = self.state.cooldown_until {
                if now < until {
                    self.note(format!(
                        "cooldown active for {:.0}s more; holding off: {wanted}",
                        until.saturating_duration_since(now).as_secs_f64()
                    ));
                    return Directive::Keep;
                }
            }
        }
        wanted
    }

    /// Commit a transition after the service operation succeeded.
    pub fn commit(&mut self, directive: Directive, now: Instant) {
        match directive {
            Directive::Keep => return,
            Directive::Start { reason } | Directive::Restart { reason } => {
                self.state.fallback_active = true;
                self.outage_reason = Some(reason);
            }
            Directive::Stop => {
                self.state.fallback_active = false;
                self.outage_reason = None;
            }
        }
        self.state.consecutive_healthy = 0;
        self.state.last_transition_at = Some(now);
        self.state.cooldown_until = Some(now + self.cfg.cooldown);
        // Only reports arriving after the transition count towards recovery.
        if let Some(latest) = self.latest_seq {
            self.counted_seq = latest + 1;
        }
        self.note(format!("committed: {directive}"));
    }

    /// Record a failed service operation; state is deliberately untouched.
    pub fn note_failure(&mut self, directive: Directive) {
        self.note(format!("{directive} failed; retrying next tick"));
    }

    fn note(&mut self, decision: impl Into<String>) {
        self.last_decision = decision.into();
        self.decided_at = Utc::now();
    }
}

/// Recovery predicate: the encoder child is up and neither camera indicator
/// is known-bad. Unknown indicators count as healthy so a primary without a
/// camera probe does not flap the fallback.
pub fn report_is_healthy(record: &HeartbeatRecord, ping_reachable: Option<bool>) -> bool {
    let network = effective_network(record, ping_reachable);
    record.report.streaming_active
        && record.report.camera_signal_available.unwrap_or(true)
        && network.unwrap_or(true)
}

/// Hard failure: both indicators explicitly false. A single bad indicator
/// keeps the report unhealthy but does not force the slate on air.
pub fn hard_camera_failure(record: &HeartbeatRecord, ping_reachable: Option<bool>) -> bool {
    record.report.camera_signal_available == Some(false)
        && effective_network(record, ping_reachable) == Some(false)
}

/// The secondary's own ping may downgrade the reported reachability, never
/// upgrade it.
fn effective_network(record: &HeartbeatRecord, ping_reachable: Option<bool>) -> Option<bool> {
    match ping_reachable {
        Some(false) => Some(false),
        _ => record.report.camera_network_reachable,
    }
}

/// Everything the periodic decision loop needs.
pub struct DecisionLoop {
    pub store: Arc<HeartbeatStore>,
    pub controller: ServiceController,
    pub decider: Decider,
    pub engine_view: Arc<RwLock<EngineView>>,
    pub recovery_tx: Option<mpsc::Sender<()>>,
    pub ping_rx: Option<watch::Receiver<PingStatus>>,
    pub mode_file: std::path::PathBuf,
    pub check_interval: Duration,
}

impl DecisionLoop {
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }
        info!("decision loop stopped");
    }

    /// One self-healing tick: any failure here is logged and absorbed.
    pub async fn tick(&mut self) {
        self.store.evict_expired().await;
        let records = self.store.snapshot().await;
        let ping = self
            .ping_rx
            .as_mut()
            .and_then(|rx| rx.borrow_and_update().reachable);

        let directive = self.decider.evaluate(&records, ping, Instant::now());
        match directive {
            Directive::Keep => {}
            Directive::Start { reason } | Directive::Restart { reason } => {
                self.write_mode(reason.mode());
                let outcome = match directive {
                    Directive::Restart { .. } => self.controller.restart().await,
                    _ => self.controller.start().await,
                };
                if outcome.is_success() {
                    info!("fallback engaged: {directive}");
                    self.decider.commit(directive, Instant::now());
                } else {
                    warn!("service control failed for {directive}: {outcome}");
                    self.decider.note_failure(directive);
                }
            }
            Directive::Stop => {
                let outcome = self.controller.stop().await;
                if outcome.is_success() {
                    info!("fallback released: primary recovered");
                    self.decider.commit(directive, Instant::now());
                    // Next unplanned start should come up lively, not bars.
                    self.write_mode(FallbackMode::Life);
                    if let Some(tx) = &self.recovery_tx {
                        if tx.try_send(()).is_err() {
                            tracing::debug!("recovery hint already pending; not queueing another");
                        }
                    }
                } else {
                    warn!("service control failed for {directive}: {outcome}");
                    self.decider.note_failure(directive);
                }
            }
        }

        let mut view = self.engine_view.write().await;
        view.fallback_active = self.decider.state().fallback_active;
        view.last_decision = self.decider.last_decision().to_string();
        view.decided_at = self.decider.decided_at();
    }

    fn write_mode(&self, mode: FallbackMode) {
        if let Err(err) = ingest::write_mode_file(&self.mode_file, mode) {
            warn!("could not write fallback mode file: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::HeartbeatReport;

    fn record(
        seq: u64,
        age: Duration,
        now: Instant,
        streaming: bool,
        camera: Option<bool>,
        network: Option<bool>,
    ) -> HeartbeatRecord {
        HeartbeatRecord {
            received_at: Utc::now(),
            source_address: "test".into(),
            seq,
            report: HeartbeatReport {
                streaming_active: streaming,
                camera_signal_available: camera,
                camera_network_reachable: network,
                ..Default::default()
            },
            received_mono: Some(now.checked_sub(age).unwrap()),
        }
    }

    fn cfg() -> DeciderConfig {
        DeciderConfig {
            missed_threshold: Duration::from_secs(40),
            recovery_reports: 2,
            cooldown: Duration::from_secs(30),
        }
    }

    fn far_future() -> Instant {
        // A fixed origin far from zero so checked_sub never underflows.
        Instant::now() + Duration::from_secs(3600)
    }

    #[test]
    fn healthy_treats_unknown_camera_indicators_as_good() {
        let now = far_future();
        let rec = record(0, Duration::ZERO, now, true, None, None);
        assert!(report_is_healthy(&rec, None));

        let rec = record(0, Duration::ZERO, now, true, Some(true), None);
        assert!(report_is_healthy(&rec, None));

        let rec = record(0, Duration::ZERO, now, false, Some(true), Some(true));
        assert!(!report_is_healthy(&rec, None));
    }

    #[test]
    fn hard_failure_requires_both_indicators_false() {
        let now = far_future();
        let both = record(0, Duration::ZERO, now, true, Some(false), Some(false));
        assert!(hard_camera_failure(&both, None));
        assert!(!report_is_healthy(&both, None));

        let signal_only = record(0, Duration::ZERO, now, true, Some(false), None);
        assert!(!hard_camera_failure(&signal_only, None));
        assert!(!report_is_healthy(&signal_only, None));
    }

    #[test]
    fn secondary_ping_downgrades_but_never_upgrades() {
        let now = far_future();
        let rec = record(0, Duration::ZERO, now, true, Some(false), None);
        // Ping failure supplies the missing network indicator.
        assert!(hard_camera_failure(&rec, Some(false)));

        let reported_down = record(0, Duration::ZERO, now, true, Some(false), Some(false));
        // A successful secondary ping does not override the primary's view.
        assert!(hard_camera_failure(&reported_down, Some(true)));
    }

    #[test]
    fn empty_store_starts_the_fallback() {
        let mut decider = Decider::new(cfg(), false);
        let directive = decider.evaluate(&[], None, far_future());
        assert_eq!(
            directive,
            Directive::Start {
                reason: OutageReason::NoHeartbeats
            }
        );
    }

    #[test]
    fn stale_heartbeat_starts_and_boundary_is_inclusive() {
        let now = far_future();
        let mut decider = Decider::new(cfg(), false);

        // Exactly at the threshold: still fresh.
        let at_boundary = vec![record(0, Duration::from_secs(40), now, true, None, None)];
        assert_eq!(decider.evaluate(&at_boundary, None, now), Directive::Keep);

        // One second past: lost.
        let past = vec![record(0, Duration::from_secs(41), now, true, None, None)];
        assert_eq!(
            decider.evaluate(&past, None, now),
            Directive::Start {
                reason: OutageReason::NoHeartbeats
            }
        );
    }

    #[test]
    fn camera_hard_failure_flips_even_with_fresh_reports() {
        let now = far_future();
        let mut decider = Decider::new(cfg(), false);
        let records = vec![record(0, Duration::from_secs(5), now, true, Some(false), Some(false))];
        assert_eq!(
            decider.evaluate(&records, None, now),
            Directive::Start {
                reason: OutageReason::CameraFailure
            }
        );
    }

    #[test]
    fn recovery_needs_consecutive_healthy_reports() {
        let now = far_future();
        let mut decider = Decider::new(cfg(), true);

        // One healthy report is not enough.
        let one = vec![record(0, Duration::from_secs(5), now, true, Some(true), None)];
        assert_eq!(decider.evaluate(&one, None, now), Directive::Keep);
        assert_eq!(decider.state().consecutive_healthy, 1);

        // Second consecutive healthy report clears it.
        let two = vec![
            record(0, Duration::from_secs(25), now, true, Some(true), None),
            record(1, Duration::from_secs(5), now, true, Some(true), None),
        ];
        assert_eq!(decider.evaluate(&two, None, now), Directive::Stop);
    }

    #[test]
    fn unhealthy_report_resets_the_recovery_counter() {
        let now = far_future();
        let mut decider = Decider::new(cfg(), true);

        let records = vec![
            record(0, Duration::from_secs(30), now, true, Some(true), None),
            record(1, Duration::from_secs(20), now, false, None, None),
            record(2, Duration::from_secs(5), now, true, Some(true), None),
        ];
        assert_eq!(decider.evaluate(&records, None, now), Directive::Keep);
        assert_eq!(decider.state().consecutive_healthy, 1);
    }

    #[test]
    fn cooldown_suppresses_transitions() {
        let now = far_future();
        let mut decider = Decider::new(cfg(), false);

        let directive = decider.evaluate(&[], None, now);
        assert_eq!(
            directive,
            Directive::Start {
                reason: OutageReason::NoHeartbeats
            }
        );
        decider.commit(directive, now);
        assert!(decider.state().fallback_active);

        // Healthy reports right after the start: recovery is due but held.
        let healthy = vec![
            record(0, Duration::from_secs(2), now, true, Some(true), None),
            record(1, Duration::from_secs(1), now, true, Some(true), None),
        ];
        let in_cooldown = now + Duration::from_secs(10);
        assert_eq!(
            decider.evaluate(&healthy, None, in_cooldown),
            Directive::Keep
        );
        assert!(decider.last_decision().contains("cooldown"));

        // After the cooldown the same evidence releases the fallback.
        let after = now + Duration::from_secs(31);
        assert_eq!(decider.evaluate(&healthy, None, after), Directive::Stop);
    }

    #[test]
    fn reports_before_the_outage_do_not_count_towards_recovery() {
        let now = far_future();
        let mut decider = Decider::new(cfg(), false);

        // Two healthy reports arrive while the primary is up.
        let healthy = vec![
            record(0, Duration::from_secs(30), now, true, Some(true), None),
            record(1, Duration::from_secs(25), now, true, Some(true), None),
        ];
        assert_eq!(decider.evaluate(&healthy, None, now), Directive::Keep);

        // The primary goes silent and the fallback starts.
        let later = now + Duration::from_secs(60);
        let directive = decider.evaluate(&healthy, None, later);
        assert_eq!(
            directive,
            Directive::Start {
                reason: OutageReason::NoHeartbeats
            }
        );
        decider.commit(directive, later);

        // The old healthy reports must not satisfy the recovery criteria.
        let after = later + Duration::from_secs(31);
        assert_eq!(decider.evaluate(&healthy, None, after), Directive::Keep);
        assert_eq!(decider.state().consecutive_healthy, 0);
    }

    #[test]
    fn outage_class_change_restarts_in_bars_mode() {
        let now = far_future();
        let mut decider = Decider::new(cfg(), false);

        let directive = decider.evaluate(&[], None, now);
        decider.commit(directive, now);

        // Heartbeats resume, but with a dead camera.
        let after_cooldown = now + Duration::from_secs(40);
        let records = vec![record(
            0,
            Duration::from_secs(2),
            after_cooldown,
            true,
            Some(false),
            Some(false),
        )];
        assert_eq!(
            decider.evaluate(&records, None, after_cooldown),
            Directive::Restart {
                reason: OutageReason::CameraFailure
            }
        );
    }

    #[test]
    fn commit_failure_path_leaves_state_untouched() {
        let now = far_future();
        let mut decider = Decider::new(cfg(), false);

        let directive = decider.evaluate(&[], None, now);
        decider.note_failure(directive);
        assert!(!decider.state().fallback_active);
        assert!(decider.state().cooldown_until.is_none());

        // Next tick proposes the same transition again.
        assert_eq!(
            decider.evaluate(&[], None, now + Duration::from_secs(5)),
            Directive::Start {
                reason: OutageReason::NoHeartbeats
            }
        );
    }
}
