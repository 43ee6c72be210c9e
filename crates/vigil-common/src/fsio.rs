//! Small filesystem helpers: atomic writes and tolerant JSON loads.
//!
//! Every state file the controller touches (heartbeat mirror, fallback mode,
//! encoder progress) is replaced wholesale, never appended, so readers can
//! never observe a half-written file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::warn;

/// Write `bytes` to `path` atomically: temp file in the same directory, then
/// rename over the target.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

/// Load a JSON value from `path`, treating a missing, unreadable or corrupt
/// file as `default`. Corruption is logged, never propagated; the in-memory
/// state is authoritative.
pub fn load_json_or<T: DeserializeOwned>(path: &Path, default: T) -> T {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return default,
        Err(err) => {
            warn!("could not read {}: {err}; starting empty", path.display());
            return default;
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(err) => {
            warn!("could not parse {}: {err}; starting empty", path.display());
            default
        }
    }
}
