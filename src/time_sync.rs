//! Exchange clock tracking for signed requests.
//!
//! One [`TimeSync`] instance is created per exchange endpoint at startup,
//! refreshed periodically by [`TimeSync::spawn_refresh`] and torn down by
//! flipping the shutdown channel handed to it. The clock and the server-time
//! source are injected so the whole lifecycle is deterministic under test.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::TimeSyncConfig;
use crate::error::{is_timestamp_rejection, is_transient, AppError};

const MAX_HISTORY: usize = 10;
const MAX_MANUAL_ADJUST_MS: i64 = 2_000;

pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[async_trait]
pub trait ServerTimeSource: Send + Sync {
    async fn fetch_server_time(&self) -> Result<u64>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimeOffset {
    pub last_server_time: u64,
    /// `server_time - local_time` at the last accepted sync.
    pub offset_ms: i64,
    pub is_synchronized: bool,
    /// Local clock reading of the last successful sync.
    pub last_sync_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncRecord {
    pub attempted_at: u64,
    pub server_time: Option<u64>,
    pub offset_ms: i64,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStats {
    pub total_syncs: usize,
    pub successful_syncs: usize,
    pub success_rate_pct: f64,
    pub avg_offset_ms: i64,
    pub last_sync_at: Option<u64>,
}

/// Which failures [`TimeSync::with_timestamp_retry`] retries once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOn {
    /// Only exchange timestamp rejections; for calls that must not repeat
    /// after an ambiguous transport failure (order placement).
    TimestampRejection,
    /// Timestamp rejections plus timeouts and connection errors.
    AnyTransient,
}

pub struct TimeSync {
    source: Arc<dyn ServerTimeSource>,
    clock: Arc<dyn Clock>,
    config: TimeSyncConfig,
    state: Mutex<TimeOffset>,
    history: Mutex<VecDeque<SyncRecord>>,
    sync_gate: tokio::sync::Mutex<()>,
}

impl TimeSync {
    pub fn new(
        source: Arc<dyn ServerTimeSource>,
        clock: Arc<dyn Clock>,
        config: TimeSyncConfig,
    ) -> Self {
        Self {
            source,
            clock,
            config,
            state: Mutex::new(TimeOffset::default()),
            history: Mutex::new(VecDeque::with_capacity(MAX_HISTORY)),
            sync_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> TimeOffset {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_synchronized(&self) -> bool {
        self.snapshot().is_synchronized
    }

    pub fn offset_ms(&self) -> i64 {
        self.snapshot().offset_ms
    }

    /// Local clock corrected by the current offset.
    pub fn server_now_ms(&self) -> u64 {
        let now = self.clock.now_ms() as i64;
        (now + self.offset_ms()).max(0) as u64
    }

    /// Fetch the exchange clock once and update the offset. Failures keep the
    /// previous offset and are only logged; returns whether the sync succeeded.
    pub async fn sync(&self) -> bool {
        let attempted_at = self.clock.now_ms();
        let timeout_ms = self.config.request_timeout_ms;
        let fetched = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.source.fetch_server_time(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(timeout_ms).into()),
        };

        match fetched {
            Ok(server_time) => {
                let local = self.clock.now_ms();
                let new_offset = server_time as i64 - local as i64;
                let offset_ms = {
                    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                    if !state.is_synchronized
                        || (new_offset - state.offset_ms).unsigned_abs() >= self.config.hysteresis_ms
                    {
                        state.offset_ms = new_offset;
                    }
                    state.last_server_time = server_time;
                    state.is_synchronized = true;
                    state.last_sync_at = Some(local);
                    state.offset_ms
                };
                tracing::debug!(server_time, local, offset_ms, "Server time synchronized");
                self.record(SyncRecord {
                    attempted_at,
                    server_time: Some(server_time),
                    offset_ms,
                    success: true,
                    error: None,
                });
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Server time sync failed, keeping previous offset");
                self.record(SyncRecord {
                    attempted_at,
                    server_time: None,
                    offset_ms: self.offset_ms(),
                    success: false,
                    error: Some(format!("{:#}", e)),
                });
                false
            }
        }
    }

    fn is_fresh(&self) -> bool {
        let state = self.snapshot();
        match (state.is_synchronized, state.last_sync_at) {
            (true, Some(at)) => {
                self.clock.now_ms().saturating_sub(at) < self.config.min_sync_interval_ms
            }
            _ => false,
        }
    }

    /// Sync only when unsynchronised or stale. Concurrent callers wait on the
    /// same in-flight sync instead of issuing their own.
    pub async fn ensure(&self) {
        if self.is_fresh() {
            return;
        }
        let _gate = self.sync_gate.lock().await;
        if self.is_fresh() {
            return;
        }
        self.sync().await;
    }

    /// Timestamp for signing a request.
    ///
    /// Synchronised: `max(last_server_time - safety_margin, now - max_staleness)`,
    /// capped at `last_server_time` so it is never ahead of the exchange clock.
    /// Unsynchronised: `now - fallback_margin`.
    pub fn safe_timestamp(&self) -> u64 {
        let now = self.clock.now_ms();
        let state = self.snapshot();
        if !state.is_synchronized {
            return now.saturating_sub(self.config.fallback_margin_ms);
        }
        let behind_server = state
            .last_server_time
            .saturating_sub(self.config.safety_margin_ms);
        let staleness_floor = now.saturating_sub(self.config.max_staleness_ms);
        if staleness_floor > state.last_server_time {
            tracing::warn!(
                last_server_time = state.last_server_time,
                now,
                "Server time is stale, timestamp may fall outside recvWindow"
            );
        }
        behind_server
            .max(staleness_floor)
            .min(state.last_server_time)
    }

    /// Run a signed call with a fresh safe timestamp. A rejection matching
    /// `retry_on` triggers one re-sync and exactly one retry; the second
    /// outcome is returned as is.
    pub async fn with_timestamp_retry<T, F, Fut>(&self, retry_on: RetryOn, mut call: F) -> Result<T>
    where
        F: FnMut(u64) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure().await;
        match call(self.safe_timestamp()).await {
            Err(e) if Self::should_retry(retry_on, &e) => {
                tracing::warn!(error = %e, "Signed call rejected, re-syncing and retrying once");
                self.sync().await;
                call(self.safe_timestamp()).await
            }
            other => other,
        }
    }

    fn should_retry(retry_on: RetryOn, err: &anyhow::Error) -> bool {
        match retry_on {
            RetryOn::TimestampRejection => is_timestamp_rejection(err),
            RetryOn::AnyTransient => is_transient(err),
        }
    }

    /// Manual correction, clamped to +/-2s per call.
    pub fn adjust_offset(&self, delta_ms: i64) -> i64 {
        let clamped = delta_ms.clamp(-MAX_MANUAL_ADJUST_MS, MAX_MANUAL_ADJUST_MS);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let before = state.offset_ms;
        state.offset_ms += clamped;
        state.last_server_time = (state.last_server_time as i64 + clamped).max(0) as u64;
        tracing::info!(before, after = state.offset_ms, delta = clamped, "Offset adjusted manually");
        state.offset_ms
    }

    fn record(&self, rec: SyncRecord) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_front(rec);
        history.truncate(MAX_HISTORY);
    }

    /// Most recent attempts first.
    pub fn history(&self) -> Vec<SyncRecord> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> SyncStats {
        let history = self.history();
        let successful: Vec<&SyncRecord> = history.iter().filter(|r| r.success).collect();
        let avg_offset_ms = if successful.is_empty() {
            0
        } else {
            successful.iter().map(|r| r.offset_ms).sum::<i64>() / successful.len() as i64
        };
        let success_rate_pct = if history.is_empty() {
            0.0
        } else {
            successful.len() as f64 / history.len() as f64 * 100.0
        };
        SyncStats {
            total_syncs: history.len(),
            successful_syncs: successful.len(),
            success_rate_pct,
            avg_offset_ms,
            last_sync_at: self.snapshot().last_sync_at,
        }
    }

    /// Periodic refresh until `shutdown` flips to `true` or its sender drops.
    pub fn spawn_refresh(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.refresh_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sync().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Time sync refresh stopped");
        })
    }
}
