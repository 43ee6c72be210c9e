//! Wire types for the heartbeat contract between the primary host and the
//! monitor daemon.
//!
//! Reports travel as JSON with camelCase field names. Fields the monitor does
//! not know about are preserved verbatim so a newer reporter can talk to an
//! older monitor and the extra data still shows up in `GET /status`.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single status report as posted by the primary host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatReport {
    /// Wall-clock timestamp set by the sender. Advisory only; the monitor
    /// keys every decision off its own arrival clock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<DateTime<Utc>>,

    /// Whether the primary's encoder child is alive.
    #[serde(default)]
    pub streaming_active: bool,

    #[serde(default)]
    pub ffmpeg_running: bool,

    #[serde(default)]
    pub day_window_active: bool,

    /// Result of the primary's camera probe. `None` means the probe has not
    /// run (or the primary has no camera probe at all).
    #[serde(default)]
    pub camera_signal_available: Option<bool>,

    /// Result of the primary's reachability ping against the camera host.
    #[serde(default)]
    pub camera_network_reachable: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Opaque configuration fingerprint / snapshot from the sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,

    /// Unknown fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A report as held by the monitor's record store.
///
/// `received_at` is the wall-clock arrival time and is what goes over the
/// wire; `received_mono` is the monotonic anchor used for every eviction and
/// threshold decision. The monotonic anchor is rebuilt after a restart from
/// the persisted wall-clock value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRecord {
    pub received_at: DateTime<Utc>,

    /// Peer address as seen by the HTTP server.
    pub source_address: String,

    /// Store-assigned sequence number, increasing in arrival order.
    #[serde(default)]
    pub seq: u64,

    #[serde(flatten)]
    pub report: HeartbeatReport,

    #[serde(skip)]
    pub received_mono: Option<Instant>,
}

impl HeartbeatRecord {
    /// Age of this record relative to `now`, in the monotonic domain.
    ///
    /// Records without an anchor (should not happen after a store load)
    /// count as brand new rather than infinitely old.
    pub fn age(&self, now: Instant) -> std::time::Duration {
        match self.received_mono {
            Some(anchor) => now.saturating_duration_since(anchor),
            None => std::time::Duration::ZERO,
        }
    }
}

/// Acknowledgement returned for `POST /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatAck {
    pub ok: bool,
    pub received_at: DateTime<Utc>,
    pub fallback_active: bool,
    pub seconds_since_last_heartbeat: f64,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub records: Vec<HeartbeatRecord>,
    pub fallback_active: bool,
    pub last_decision: String,
    pub decided_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn report_roundtrip_preserves_unknown_fields() {
        let raw = json!({
            "reportedAt": "2024-11-02T10:00:00Z",
            "streamingActive": true,
            "cameraSignalAvailable": null,
            "machineId": "PRIMARY-01",
            "uploadKbps": 4800,
        });

        let report: HeartbeatReport = serde_json::from_value(raw).unwrap();
        assert!(report.streaming_active);
        assert_eq!(report.camera_signal_available, None);
        assert_eq!(report.extra["machineId"], json!("PRIMARY-01"));
        assert_eq!(report.extra["uploadKbps"], json!(4800));

        let back = serde_json::to_value(&report).unwrap();
        assert_eq!(back["machineId"], json!("PRIMARY-01"));
        assert_eq!(back["uploadKbps"], json!(4800));
    }

    #[test]
    fn missing_fields_default_to_inactive() {
        let report: HeartbeatReport = serde_json::from_value(json!({})).unwrap();
        assert!(!report.streaming_active);
        assert!(!report.ffmpeg_running);
        assert_eq!(report.camera_signal_available, None);
        assert_eq!(report.camera_network_reachable, None);
    }

    #[test]
    fn record_serializes_report_fields_inline() {
        let record = HeartbeatRecord {
            received_at: "2024-11-02T10:00:05Z".parse().unwrap(),
            source_address: "203.0.113.9:51234".into(),
            seq: 7,
            report: HeartbeatReport {
                streaming_active: true,
                ..Default::default()
            },
            received_mono: Some(Instant::now()),
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["streamingActive"], json!(true));
        assert_eq!(value["sourceAddress"], json!("203.0.113.9:51234"));
        assert_eq!(value["seq"], json!(7));
        // The monotonic anchor never goes over the wire.
        assert!(value.get("receivedMono").is_none());
    }
}
