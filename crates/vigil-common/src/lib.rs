//! # vigil-common
//!
//! Shared building blocks for the vigil stream-fallback controller:
//!
//! | Area | Description | Key items |
//! |------|-------------|-----------|
//! | **Heartbeat wire** | Report/record/ack types exchanged between the primary reporter and the monitor. | [`HeartbeatReport`], [`HeartbeatRecord`], [`HeartbeatAck`], [`MonitorSnapshot`] |
//! | **Ingest** | Stream-key sanitation, backup-URL assembly, fallback-mode file. | [`sanitize_stream_key`], [`normalize_backup_url`], [`FallbackMode`] |
//! | **Platform API** | OAuth refresh + live-broadcast listing used by the recovery and ensure probes. | [`ApiClient`], [`BroadcastProbe`], [`PlatformError`] |
//! | **Files** | Atomic writes, tolerant JSON loads, shell-style env files. | [`fsio`], [`envfile`] |

pub mod envfile;
pub mod fsio;
pub mod heartbeat;
pub mod ingest;
pub mod platform;

pub use heartbeat::{HeartbeatAck, HeartbeatRecord, HeartbeatReport, MonitorSnapshot};
pub use ingest::{
    normalize_backup_url, read_mode_file, sanitize_stream_key, write_mode_file, FallbackMode,
};
pub use platform::{ApiClient, Broadcast, BroadcastProbe, PlatformError, StoredToken};
