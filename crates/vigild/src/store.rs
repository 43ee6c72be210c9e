//! In-memory heartbeat record store with a JSON mirror on disk.
//!
//! The store is the only shared mutable state in the daemon. Writers hold an
//! exclusive lock for the duration of insert + evict; readers always get a
//! cloned snapshot. Persistence runs on its own task fed by a watch channel,
//! so a slow disk never stalls a request or a decision tick.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_common::{fsio, HeartbeatRecord, HeartbeatReport};

pub struct HeartbeatStore {
    inner: RwLock<Inner>,
    window: Duration,
    max_records: usize,
    flush_tx: watch::Sender<Vec<HeartbeatRecord>>,
}

struct Inner {
    records: VecDeque<HeartbeatRecord>,
    next_seq: u64,
}

impl HeartbeatStore {
    pub fn new(window: Duration, max_records: usize) -> Self {
        let (flush_tx, _) = watch::channel(Vec::new());
        Self {
            inner: RwLock::new(Inner {
                records: VecDeque::new(),
                next_seq: 0,
            }),
            window,
            max_records,
            flush_tx,
        }
    }

    /// Load the store from its JSON mirror. A missing or corrupt file starts
    /// empty. Persisted wall-clock arrival times are re-anchored onto the
    /// monotonic clock so record ages survive a daemon restart.
    pub fn load(path: &Path, window: Duration, max_records: usize) -> Self {
        let mut store = Self::new(window, max_records);
        let mut records: Vec<HeartbeatRecord> = fsio::load_json_or(path, Vec::new());

        let now_wall = Utc::now();
        let now_mono = Instant::now();
        for record in &mut records {
            let age = (now_wall - record.received_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            record.received_mono = Some(now_mono.checked_sub(age).unwrap_or(now_mono));
        }
        records.sort_by_key(|r| r.received_at);

        {
            let inner = store.inner.get_mut();
            inner.next_seq = records.iter().map(|r| r.seq + 1).max().unwrap_or(0);
            inner.records = records.into();
            Self::evict_locked(inner, now_mono, window, max_records);
            info!("loaded {} heartbeat record(s) from disk", inner.records.len());
        }
        store
    }

    /// Insert a fresh report, evict by age and count, and schedule a flush.
    pub async fn append(&self, report: HeartbeatReport, source_address: String) -> HeartbeatRecord {
        let now_mono = Instant::now();
        let mut inner = self.inner.write().await;

        let record = HeartbeatRecord {
            received_at: Utc::now(),
            source_address,
            seq: inner.next_seq,
            report,
            received_mono: Some(now_mono),
        };
        inner.next_seq += 1;
        inner.records.push_back(record.clone());
        Self::evict_locked(&mut inner, now_mono, self.window, self.max_records);
        self.publish(&inner);
        record
    }

    /// Drop records that aged out of the window. Called by the decision
    /// loop on every tick in addition to the implicit eviction on insert.
    pub async fn evict_expired(&self) {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let before = inner.records.len();
        Self::evict_locked(&mut inner, now, self.window, self.max_records);
        if inner.records.len() != before {
            debug!("evicted {} aged-out record(s)", before - inner.records.len());
            self.publish(&inner);
        }
    }

    pub async fn snapshot(&self) -> Vec<HeartbeatRecord> {
        self.inner.read().await.records.iter().cloned().collect()
    }

    pub async fn latest(&self) -> Option<HeartbeatRecord> {
        self.inner.read().await.records.back().cloned()
    }

    /// Subscribe to persistence snapshots; used by the flush worker.
    pub fn subscribe(&self) -> watch::Receiver<Vec<HeartbeatRecord>> {
        self.flush_tx.subscribe()
    }

    fn publish(&self, inner: &Inner) {
        self.flush_tx
            .send_replace(inner.records.iter().cloned().collect());
    }

    fn evict_locked(inner: &mut Inner, now: Instant, window: Duration, max_records: usize) {
        // A record exactly at the window boundary is still fresh.
        while let Some(front) = inner.records.front() {
            if front.age(now) > window {
                inner.records.pop_front();
            } else {
                break;
            }
        }
        while inner.records.len() > max_records {
            inner.records.pop_front();
        }
    }
}

/// Persistence worker: mirrors every store mutation into the state file.
/// Write failures are logged and dropped; memory stays authoritative.
pub async fn run_flush_worker(
    path: PathBuf,
    mut rx: watch::Receiver<Vec<HeartbeatRecord>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let records = rx.borrow_and_update().clone();
        let payload = match serde_json::to_vec_pretty(&records) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("could not serialize heartbeat state: {err}");
                continue;
            }
        };
        if let Err(err) = fsio::write_atomic(&path, &payload) {
            warn!("could not persist heartbeat state to {}: {err}", path.display());
        }
    }
}
