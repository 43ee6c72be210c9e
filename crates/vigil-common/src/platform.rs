//! Thin client for the video platform's live-streaming REST API.
//!
//! Used by two consumers with slightly different questions:
//! the monitor's recovery probe ("is the primary's broadcast back and
//! bound?") and the operator's ensure-broadcast check ("will the next air
//! window find a broadcast at all?"). Both share the listing + binding
//! classification here.

use std::path::Path;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Default REST endpoint of the platform API.
pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
/// Default OAuth token endpoint used for the refresh grant.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Deadline for any single API request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Page size for broadcast listings. One page is plenty: a channel with more
/// than 25 simultaneous broadcasts has bigger problems than failover.
const MAX_RESULTS: u32 = 25;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("credentials rejected: {0}")]
    InvalidToken(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("api returned HTTP {0}")]
    Http(StatusCode),
    #[error("unexpected api payload: {0}")]
    Decode(String),
}

/// OAuth refresh-token credentials as stored on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredToken {
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl StoredToken {
    /// Load credentials from a JSON file. Any failure (missing file, bad
    /// JSON, missing fields) is an `InvalidToken`: the caller logs and moves
    /// on, it never retries in-loop.
    pub fn load(path: &Path) -> Result<Self, PlatformError> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| PlatformError::InvalidToken(format!("{}: {err}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|err| PlatformError::InvalidToken(format!("{}: {err}", path.display())))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// One broadcast as returned by the listing endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Broadcast {
    pub id: String,
    pub status: BroadcastStatus,
    pub content_details: BroadcastContentDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadcastStatus {
    pub life_cycle_status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadcastContentDetails {
    pub bound_stream_id: Option<String>,
    /// Some API shapes report several bindings; a match on any of them
    /// counts.
    pub bound_stream_ids: Option<Vec<String>>,
}

impl Broadcast {
    pub fn lifecycle(&self) -> &str {
        &self.status.life_cycle_status
    }

    /// All stream ids this broadcast is bound to.
    pub fn bindings(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        if let Some(id) = self.content_details.bound_stream_id.as_deref() {
            out.push(id);
        }
        if let Some(ids) = &self.content_details.bound_stream_ids {
            for id in ids {
                if !out.contains(&id.as_str()) {
                    out.push(id);
                }
            }
        }
        out
    }

    pub fn is_bound_to(&self, stream_id: &str) -> bool {
        self.bindings().iter().any(|id| *id == stream_id)
    }
}

#[derive(Debug, Deserialize)]
struct BroadcastListResponse {
    #[serde(default)]
    items: Vec<Broadcast>,
}

/// One ingest stream as returned by the stream endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveStream {
    pub id: String,
    pub status: LiveStreamStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveStreamStatus {
    pub stream_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamListResponse {
    #[serde(default)]
    items: Vec<LiveStream>,
}

/// Outcome of a broadcast/binding probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastProbe {
    Eligible {
        broadcast_id: String,
        lifecycle: String,
        /// Whether the broadcast came from the `active` listing (as opposed
        /// to `upcoming`).
        from_active: bool,
    },
    /// The channel has no active or upcoming broadcast at all.
    NoBroadcast,
    /// Broadcasts exist, but none is bound to the expected stream.
    WrongBinding { broadcasts_seen: usize },
}

impl BroadcastProbe {
    /// Whether the binding is ready to take the primary's feed right now:
    /// bound, and either already on air or in a startable lifecycle state.
    pub fn ready_for_ingest(&self) -> bool {
        match self {
            BroadcastProbe::Eligible {
                from_active,
                lifecycle,
                ..
            } => *from_active || matches!(lifecycle.as_str(), "live" | "testing" | "ready"),
            _ => false,
        }
    }
}

/// Lifecycle ordering used to pick the most relevant broadcast when several
/// are bound.
fn lifecycle_priority(lifecycle: &str) -> u8 {
    match lifecycle {
        "live" => 0,
        "testing" => 1,
        "ready" => 2,
        "created" => 3,
        "scheduled" => 4,
        _ => 99,
    }
}

/// Classify active + upcoming listings against the expected stream id.
pub fn classify_broadcasts(
    active: &[Broadcast],
    upcoming: &[Broadcast],
    stream_id: &str,
) -> BroadcastProbe {
    let total = active.len() + upcoming.len();
    if total == 0 {
        return BroadcastProbe::NoBroadcast;
    }

    let bound = active
        .iter()
        .map(|b| (b, true))
        .chain(upcoming.iter().map(|b| (b, false)))
        .filter(|(b, _)| b.is_bound_to(stream_id))
        .min_by_key(|(b, _)| lifecycle_priority(b.lifecycle()));

    match bound {
        Some((broadcast, from_active)) => BroadcastProbe::Eligible {
            broadcast_id: broadcast.id.clone(),
            lifecycle: broadcast.lifecycle().to_string(),
            from_active,
        },
        None => BroadcastProbe::WrongBinding {
            broadcasts_seen: total,
        },
    }
}

/// REST client with a fixed per-request deadline.
pub struct ApiClient {
    http: Client,
    base: String,
}

impl ApiClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            base: base.into(),
        }
    }

    /// Exchange a refresh token for an access token.
    pub async fn access_token(&self, token: &StoredToken) -> Result<String, PlatformError> {
        let uri = token.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let response = self
            .http
            .post(uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", token.refresh_token.as_str()),
                ("client_id", token.client_id.as_str()),
                ("client_secret", token.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|err| PlatformError::Network(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(PlatformError::InvalidToken(format!(
                "refresh rejected ({status}): {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        if !status.is_success() {
            return Err(PlatformError::Http(status));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|err| PlatformError::Decode(err.to_string()))?;
        Ok(parsed.access_token)
    }

    /// List the caller's broadcasts for a single `broadcastStatus` filter.
    /// The API rejects combined filters, so `active` and `upcoming` are
    /// always two separate calls.
    pub async fn list_broadcasts(
        &self,
        access_token: &str,
        broadcast_status: &str,
    ) -> Result<Vec<Broadcast>, PlatformError> {
        let max_results = MAX_RESULTS.to_string();
        let response = self
            .http
            .get(format!("{}/liveBroadcasts", self.base))
            .bearer_auth(access_token)
            .query(&[
                ("part", "id,contentDetails,status"),
                ("mine", "true"),
                ("broadcastStatus", broadcast_status),
                ("maxResults", max_results.as_str()),
            ])
            .send()
            .await
            .map_err(|err| PlatformError::Network(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(PlatformError::InvalidToken("access token rejected".into()));
        }
        if !status.is_success() {
            return Err(PlatformError::Http(status));
        }

        let parsed: BroadcastListResponse = response
            .json()
            .await
            .map_err(|err| PlatformError::Decode(err.to_string()))?;
        debug!(
            "listed {} broadcast(s) with status {broadcast_status}",
            parsed.items.len()
        );
        Ok(parsed.items)
    }

    /// Fetch a single ingest stream by id.
    pub async fn get_stream(
        &self,
        access_token: &str,
        stream_id: &str,
    ) -> Result<Option<LiveStream>, PlatformError> {
        let response = self
            .http
            .get(format!("{}/liveStreams", self.base))
            .bearer_auth(access_token)
            .query(&[("part", "id,status,cdn"), ("id", stream_id)])
            .send()
            .await
            .map_err(|err| PlatformError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PlatformError::Http(status));
        }

        let parsed: StreamListResponse = response
            .json()
            .await
            .map_err(|err| PlatformError::Decode(err.to_string()))?;
        Ok(parsed.items.into_iter().next())
    }

    /// Full probe: load credentials, refresh, list active and upcoming
    /// broadcasts, classify against the expected stream id.
    pub async fn probe_broadcasts(
        &self,
        token_path: &Path,
        stream_id: &str,
    ) -> Result<BroadcastProbe, PlatformError> {
        let token = StoredToken::load(token_path)?;
        let access = self.access_token(&token).await?;

        let active = self.list_broadcasts(&access, "active").await?;
        let upcoming = self.list_broadcasts(&access, "upcoming").await?;

        Ok(classify_broadcasts(&active, &upcoming, stream_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn broadcast(value: serde_json::Value) -> Broadcast {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn no_broadcasts_at_all() {
        assert_eq!(
            classify_broadcasts(&[], &[], "stream-1"),
            BroadcastProbe::NoBroadcast
        );
    }

    #[test]
    fn wrong_binding_counts_everything_seen() {
        let active = vec![broadcast(json!({
            "id": "b1",
            "status": {"lifeCycleStatus": "live"},
            "contentDetails": {"boundStreamId": "other"},
        }))];
        let upcoming = vec![broadcast(json!({"id": "b2"}))];

        assert_eq!(
            classify_broadcasts(&active, &upcoming, "stream-1"),
            BroadcastProbe::WrongBinding { broadcasts_seen: 2 }
        );
    }

    #[test]
    fn bound_active_broadcast_is_eligible_and_ready() {
        let active = vec![broadcast(json!({
            "id": "b1",
            "status": {"lifeCycleStatus": "live"},
            "contentDetails": {"boundStreamId": "stream-1"},
        }))];

        let probe = classify_broadcasts(&active, &[], "stream-1");
        assert!(probe.ready_for_ingest());
        assert_eq!(
            probe,
            BroadcastProbe::Eligible {
                broadcast_id: "b1".into(),
                lifecycle: "live".into(),
                from_active: true,
            }
        );
    }

    #[test]
    fn upcoming_scheduled_broadcast_is_eligible_but_not_ready() {
        let upcoming = vec![broadcast(json!({
            "id": "b2",
            "status": {"lifeCycleStatus": "scheduled"},
            "contentDetails": {"boundStreamId": "stream-1"},
        }))];

        let probe = classify_broadcasts(&[], &upcoming, "stream-1");
        assert!(matches!(probe, BroadcastProbe::Eligible { .. }));
        assert!(!probe.ready_for_ingest());
    }

    #[test]
    fn any_binding_in_the_list_matches() {
        let upcoming = vec![broadcast(json!({
            "id": "b3",
            "status": {"lifeCycleStatus": "ready"},
            "contentDetails": {
                "boundStreamId": "other",
                "boundStreamIds": ["also-other", "stream-1"],
            },
        }))];

        let probe = classify_broadcasts(&[], &upcoming, "stream-1");
        assert!(probe.ready_for_ingest());
    }

    #[test]
    fn live_broadcast_wins_over_scheduled_one() {
        let active = vec![broadcast(json!({
            "id": "late",
            "status": {"lifeCycleStatus": "live"},
            "contentDetails": {"boundStreamId": "stream-1"},
        }))];
        let upcoming = vec![broadcast(json!({
            "id": "early",
            "status": {"lifeCycleStatus": "scheduled"},
            "contentDetails": {"boundStreamId": "stream-1"},
        }))];

        match classify_broadcasts(&active, &upcoming, "stream-1") {
            BroadcastProbe::Eligible { broadcast_id, .. } => assert_eq!(broadcast_id, "late"),
            other => panic!("unexpected probe outcome: {other:?}"),
        }
    }
}
