//! Local state snapshots and their wire form.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use vigil_common::HeartbeatReport;

/// Point-in-time view of the primary host, as published by the streaming
/// worker (or read back from its status file).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrimarySnapshot {
    pub streaming_active: bool,
    pub ffmpeg_running: bool,
    pub day_window_active: bool,
    pub camera_signal_available: Option<bool>,
    pub camera_network_reachable: Option<bool>,
    pub last_error: Option<String>,
    /// Hash of the effective configuration, so the monitor can spot drift.
    pub config_fingerprint: Option<String>,
}

impl PrimarySnapshot {
    /// Build the heartbeat payload, stamped at send time.
    pub fn into_report(self) -> HeartbeatReport {
        let config = self
            .config_fingerprint
            .map(|fingerprint| json!({ "fingerprint": fingerprint }));
        HeartbeatReport {
            reported_at: Some(Utc::now()),
            streaming_active: self.streaming_active,
            ffmpeg_running: self.ffmpeg_running,
            day_window_active: self.day_window_active,
            camera_signal_available: self.camera_signal_available,
            camera_network_reachable: self.camera_network_reachable,
            last_error: self.last_error,
            config,
            extra: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_carries_all_indicators_and_a_timestamp() {
        let snapshot = PrimarySnapshot {
            streaming_active: true,
            ffmpeg_running: true,
            day_window_active: false,
            camera_signal_available: Some(true),
            camera_network_reachable: None,
            last_error: Some("late frames".into()),
            config_fingerprint: Some("sha256:abcd".into()),
        };

        let report = snapshot.into_report();
        assert!(report.reported_at.is_some());
        assert!(report.streaming_active);
        assert_eq!(report.camera_signal_available, Some(true));
        assert_eq!(report.camera_network_reachable, None);
        assert_eq!(report.last_error.as_deref(), Some("late frames"));
        assert_eq!(report.config.unwrap()["fingerprint"], "sha256:abcd");
    }

    #[test]
    fn snapshot_parses_from_a_worker_status_file() {
        let snapshot: PrimarySnapshot = serde_json::from_str(
            r#"{"streamingActive": true, "cameraSignalAvailable": false, "unknownField": 1}"#,
        )
        .unwrap();
        assert!(snapshot.streaming_active);
        assert_eq!(snapshot.camera_signal_available, Some(false));
    }
}
