//! Configuration for the monitor daemon.
//!
//! Everything comes from environment variables so the service unit is the
//! single source of truth. Invalid or non-positive numeric values log a
//! warning and keep the default instead of refusing to start: a monitor
//! with a typo in one knob is still better than no monitor.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;
use vigil_common::platform::DEFAULT_API_BASE;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Listen address and port of the ingress HTTP server.
    pub bind: String,
    pub port: u16,

    /// Retention window of the heartbeat store.
    pub history_window: Duration,
    /// Upper bound on retained records, oldest evicted first.
    pub max_records: usize,

    /// Silence longer than this declares the primary lost.
    pub missed_threshold: Duration,
    /// Consecutive healthy reports required to stop the fallback.
    pub recovery_reports: u32,
    /// Decision tick period.
    pub check_interval: Duration,
    /// Minimum time between fallback transitions.
    pub cooldown: Duration,

    /// On-disk mirror of the heartbeat store.
    pub state_file: PathBuf,
    /// Optional dedicated log file (stderr is always on). The tracing
    /// bootstrap reads the same variable directly before the config loader
    /// runs, so warnings from the loader itself are not lost.
    pub log_file: Option<PathBuf>,

    /// Service unit running the slate encoder.
    pub secondary_unit: String,

    /// Bearer token guarding the HTTP API.
    pub token: Option<String>,
    pub require_token: bool,

    /// Minimum interval between broadcast recovery hints.
    pub recovery_hint_cooldown: Duration,

    /// Secondary-side camera reachability probing.
    pub camera_ping_enabled: bool,
    pub camera_ping_host: Option<String>,
    pub camera_ping_interval: Duration,

    /// Fallback-mode file consumed by the slate runner.
    pub mode_file: PathBuf,

    /// Expected ingest stream id for the recovery probe.
    pub stream_id: Option<String>,
    pub api_base: String,
    pub oauth_token_file: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            history_window: Duration::from_secs(300),
            max_records: 256,
            missed_threshold: Duration::from_secs(40),
            recovery_reports: 2,
            check_interval: Duration::from_secs(5),
            cooldown: Duration::from_secs(30),
            state_file: PathBuf::from("/var/lib/vigil/heartbeats.json"),
            log_file: None,
            secondary_unit: "vigil-slate.service".into(),
            token: None,
            require_token: false,
            recovery_hint_cooldown: Duration::from_secs(300),
            camera_ping_enabled: false,
            camera_ping_host: None,
            camera_ping_interval: Duration::from_secs(30),
            mode_file: PathBuf::from("/run/vigil/fallback-mode"),
            stream_id: None,
            api_base: DEFAULT_API_BASE.into(),
            oauth_token_file: PathBuf::from("/var/lib/vigil/token.json"),
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Tests inject a
    /// map here instead of mutating process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let token = get("VIGIL_TOKEN").filter(|t| !t.is_empty());
        // A configured token implies enforcement unless explicitly relaxed.
        let require_token = match get("VIGIL_REQUIRE_TOKEN") {
            Some(raw) => parse_bool("VIGIL_REQUIRE_TOKEN", &raw, token.is_some()),
            None => token.is_some(),
        };
        if require_token && token.is_none() {
            warn!("VIGIL_REQUIRE_TOKEN is set but VIGIL_TOKEN is empty; all guarded requests will be rejected");
        }

        Self {
            bind: get("VIGIL_BIND").unwrap_or(defaults.bind),
            port: parse_num(&get, "VIGIL_PORT", defaults.port as u64) as u16,
            history_window: secs(&get, "VIGIL_HISTORY_WINDOW_SECONDS", defaults.history_window),
            max_records: parse_num(&get, "VIGIL_MAX_RECORDS", defaults.max_records as u64) as usize,
            missed_threshold: secs(
                &get,
                "VIGIL_MISSED_THRESHOLD_SECONDS",
                defaults.missed_threshold,
            ),
            recovery_reports: parse_num(
                &get,
                "VIGIL_RECOVERY_REPORTS",
                defaults.recovery_reports as u64,
            ) as u32,
            check_interval: secs(&get, "VIGIL_CHECK_INTERVAL_SECONDS", defaults.check_interval),
            cooldown: secs(&get, "VIGIL_COOLDOWN_SECONDS", defaults.cooldown),
            state_file: get("VIGIL_STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_file),
            log_file: get("VIGIL_LOG_FILE").filter(|p| !p.is_empty()).map(PathBuf::from),
            secondary_unit: get("VIGIL_SECONDARY_UNIT").unwrap_or(defaults.secondary_unit),
            token,
            require_token,
            recovery_hint_cooldown: secs(
                &get,
                "VIGIL_RECOVERY_HINT_COOLDOWN_SECONDS",
                defaults.recovery_hint_cooldown,
            ),
            camera_ping_enabled: get("VIGIL_CAMERA_PING_ENABLED")
                .map(|raw| parse_bool("VIGIL_CAMERA_PING_ENABLED", &raw, false))
                .unwrap_or(false),
            camera_ping_host: get("VIGIL_CAMERA_PING_HOST").filter(|h| !h.is_empty()),
            camera_ping_interval: secs(
                &get,
                "VIGIL_CAMERA_PING_INTERVAL_SECONDS",
                defaults.camera_ping_interval,
            ),
            mode_file: get("VIGIL_MODE_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.mode_file),
            stream_id: get("VIGIL_STREAM_ID").filter(|s| !s.is_empty()),
            api_base: get("VIGIL_API_BASE").unwrap_or(defaults.api_base),
            oauth_token_file: get("VIGIL_OAUTH_TOKEN_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.oauth_token_file),
        }
    }
}

fn parse_num(get: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    let Some(raw) = get(key) else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => value,
        Ok(_) => {
            warn!("{key}={raw:?} must be positive; using {default}");
            default
        }
        Err(_) => {
            warn!("{key}={raw:?} is not a number; using {default}");
            default
        }
    }
}

fn secs(get: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_num(get, key, default.as_secs()))
}

fn parse_bool(key: &str, raw: &str, default: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warn!("{key}={raw:?} is not a boolean; using {default}");
            default
        }
    }
}
