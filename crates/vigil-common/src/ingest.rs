//! Stream-key sanitation, backup ingest URL assembly and the fallback-mode
//! file shared by the monitor and the slate runner.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::fsio;

/// Marker that distinguishes a backup ingest URL from the primary one.
pub const BACKUP_MARKER: &str = "backup=1/";

/// Characters that must never survive in a stream key. A key containing any
/// of these is a pasted URL fragment, not a key.
const REJECTED_KEY_CHARS: &[char] = &['?', '&', '#', '=', '/'];

/// Clean up a stream key as operators actually paste it: surrounding or
/// embedded whitespace and one or more `backup=1/` fragments from a copied
/// ingest URL.
///
/// Sanitizing an already-sanitized key is a no-op.
pub fn sanitize_stream_key(raw: &str) -> Result<String> {
    let mut key: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    while let Some(idx) = key.find(BACKUP_MARKER) {
        key.replace_range(idx..idx + BACKUP_MARKER.len(), "");
    }

    if key.is_empty() {
        bail!("stream key is empty after sanitization");
    }
    if let Some(bad) = key.chars().find(|c| REJECTED_KEY_CHARS.contains(c)) {
        bail!("stream key contains forbidden character {bad:?}");
    }
    Ok(key)
}

/// Assemble the backup ingest target `{base}?backup=1/{key}`.
///
/// The base must be RTMPS; anything else is a primary-ingest URL and the
/// slate must never transmit there. A URL that already carries the exact
/// backup suffix for this key passes through unchanged, so normalization is
/// idempotent.
pub fn normalize_backup_url(base: &str, key: &str) -> Result<String> {
    let base = base.trim();
    if !base.starts_with("rtmps://") {
        bail!("refusing non-RTMPS ingest URL {base:?}");
    }

    let suffix = format!("?{BACKUP_MARKER}{key}");
    let head = match base.split_once('?') {
        None => base,
        Some((head, query)) if format!("?{query}") == suffix => head,
        Some((_, query)) => bail!("ingest URL already carries a query ({query:?})"),
    };

    Ok(format!("{}{}", head.trim_end_matches('/'), suffix))
}

/// Returns true when `url` is a valid slate target: RTMPS with the backup
/// marker embedded.
pub fn is_backup_url(url: &str) -> bool {
    url.starts_with("rtmps://") && url.contains(&format!("?{BACKUP_MARKER}"))
}

/// Visual mode of the slate when no real feed is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    /// Animated synthetic source; the default "channel is alive" look.
    Life,
    /// SMPTE color bars; signals a known camera problem.
    Smpte,
}

impl FallbackMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FallbackMode::Life => "life",
            FallbackMode::Smpte => "smpte",
        }
    }

    /// Parse a mode-file value. Accepts the legacy long form for bars.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "life" => Some(FallbackMode::Life),
            "smpte" | "smptehdbars" => Some(FallbackMode::Smpte),
            _ => None,
        }
    }
}

/// Read the fallback mode from its single-line file. A missing, unreadable
/// or unrecognized file yields `default` with a warning; the slate must
/// always be able to start.
pub fn read_mode_file(path: &Path, default: FallbackMode) -> FallbackMode {
    match fs::read_to_string(path) {
        Ok(content) => match FallbackMode::parse(&content) {
            Some(mode) => mode,
            None => {
                warn!(
                    "unrecognized fallback mode {:?} in {}; using {}",
                    content.trim(),
                    path.display(),
                    default.as_str()
                );
                default
            }
        },
        Err(err) => {
            warn!(
                "could not read fallback mode from {}: {err}; using {}",
                path.display(),
                default.as_str()
            );
            default
        }
    }
}

/// Write the fallback mode atomically.
pub fn write_mode_file(path: &Path, mode: FallbackMode) -> Result<()> {
    fsio::write_atomic(path, format!("{}\n", mode.as_str()).as_bytes())
        .with_context(|| format!("writing fallback mode to {}", path.display()))
}
