//! Encoder progress publishing.
//!
//! The child appends `key=value` blocks to a raw progress file, one block per
//! ffmpeg progress tick terminated by a `progress=` line. On our own ticker
//! we lift the last complete block into a small stable file other tooling
//! can poll, rewritten atomically each time.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vigil_common::fsio;

/// Keys published to the stable progress file, in output order.
const PUBLISHED_KEYS: &[(&str, &str)] = &[
    ("frame", "frame"),
    ("fps", "fps"),
    ("bitrate", "bitrate"),
    ("drop_frames", "dropped"),
    ("total_size", "bytesOut"),
    ("out_time", "outTime"),
];

/// Extract the last complete progress block.
pub fn parse_last_block(raw: &str) -> Option<BTreeMap<String, String>> {
    let mut current: BTreeMap<String, String> = BTreeMap::new();
    let mut last_complete: Option<BTreeMap<String, String>> = None;

    for line in raw.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key == "progress" {
            current.insert(key.into(), value.into());
            last_complete = Some(std::mem::take(&mut current));
        } else {
            current.insert(key.into(), value.into());
        }
    }
    last_complete
}

/// Render the stable `key=value` lines from a parsed block.
pub fn render_progress(block: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (source, published) in PUBLISHED_KEYS {
        let value = block.get(*source).map(String::as_str).unwrap_or("0");
        out.push_str(published);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}

/// Periodically publish the latest block from `raw_path` into `out_path`.
pub async fn run_ticker(
    raw_path: PathBuf,
    out_path: PathBuf,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let raw = match std::fs::read_to_string(&raw_path) {
            Ok(raw) => raw,
            // The child may not have produced progress yet.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => {
                debug!("could not read raw progress: {err}");
                continue;
            }
        };

        let Some(block) = parse_last_block(&raw) else {
            continue;
        };
        if let Err(err) = fsio::write_atomic(&out_path, render_progress(&block).as_bytes()) {
            warn!("could not publish progress: {err}");
        }
    }
}
