//! Shared application state: the snapshot store and sampler statistics.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hostmon_core::model::{CpuSample, MemorySample};
use serde::Serialize;
use utoipa::ToSchema;

use crate::hub::BroadcastHub;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

// ============================================================
// Snapshot store
// ============================================================

/// Latest samples, as produced by one completed tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Snapshot {
    /// Tick that produced this snapshot. Zero before the first successful tick.
    pub(crate) tick: u64,
    /// Unix timestamp in milliseconds.
    pub(crate) taken_at: i64,
    pub(crate) cpu: Option<CpuSample>,
    pub(crate) cores: Vec<CpuSample>,
    pub(crate) memory: Option<MemorySample>,
}

impl Snapshot {
    pub(crate) fn is_empty(&self) -> bool {
        self.tick == 0
    }
}

/// Single-writer, many-reader holder of the current [`Snapshot`].
///
/// The lock only guards an `Arc` swap, so readers never wait on the sampler
/// for longer than a pointer copy and never see a partially written snapshot.
#[derive(Debug, Default)]
pub(crate) struct SnapshotStore {
    current: RwLock<Arc<Snapshot>>,
}

impl SnapshotStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self) -> Arc<Snapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the current snapshot. Called only by the sampler.
    pub(crate) fn set(&self, snapshot: Snapshot) {
        let next = Arc::new(snapshot);
        let prev = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, next)
        };
        // Last reference to the old snapshot is released outside the lock
        drop(prev);
    }
}

// ============================================================
// Sampler statistics
// ============================================================

#[derive(Debug, Default)]
pub(crate) struct SamplerStats {
    ticks: AtomicU64,
    samples: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU64,
    last_sample_at: AtomicI64,
    last_error: Mutex<Option<String>>,
}

/// Point-in-time view of [`SamplerStats`].
#[derive(Debug, Clone, Serialize, ToSchema)]
pub(crate) struct SamplerStatus {
    pub(crate) ticks: u64,
    pub(crate) samples: u64,
    pub(crate) failures: u64,
    pub(crate) consecutive_failures: u64,
    /// Unix timestamp (ms) of the last successful sample.
    pub(crate) last_sample_at: Option<i64>,
    pub(crate) last_error: Option<String>,
}

impl SamplerStats {
    pub(crate) fn record_tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the number of consecutive failures this success ends.
    pub(crate) fn record_success(&self, at: i64) -> u64 {
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.last_sample_at.store(at, Ordering::Relaxed);
        self.consecutive_failures.swap(0, Ordering::Relaxed)
    }

    /// Returns the consecutive failure count including this one.
    pub(crate) fn record_failure(&self, error: String) -> u64 {
        self.failures.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub(crate) fn status(&self) -> SamplerStatus {
        let last_sample_at = self.last_sample_at.load(Ordering::Relaxed);
        SamplerStatus {
            ticks: self.ticks.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_sample_at: (last_sample_at > 0).then_some(last_sample_at),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

// ============================================================
// Router state
// ============================================================

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Arc<SnapshotStore>,
    pub(crate) hub: Arc<BroadcastHub>,
    pub(crate) stats: Arc<SamplerStats>,
    pub(crate) interval: Duration,
    pub(crate) ping_interval: Duration,
    pub(crate) write_timeout: Duration,
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
