use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

static CLOCK_RESYNC_TOTAL: AtomicU64 = AtomicU64::new(0);
static CLOCK_DRIFT_EXCEEDED_TOTAL: AtomicU64 = AtomicU64::new(0);

pub fn clock_resync_total() -> u64 {
    CLOCK_RESYNC_TOTAL.load(Ordering::Relaxed)
}

pub fn clock_drift_exceeded_total() -> u64 {
    CLOCK_DRIFT_EXCEEDED_TOTAL.load(Ordering::Relaxed)
}

/// Outcome of one server-time sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    pub offset_ms: i64,
    pub previous_offset_ms: Option<i64>,
    pub round_trip_ms: u64,
    pub drift_exceeded: bool,
}

#[derive(Debug, Default)]
struct SyncState {
    offset_ms: Option<i64>,
    last_sync_ms: u64,
    stale: bool,
}

/// Offset between the local clock and the exchange clock.
///
/// The offset is measured against the midpoint of the request round trip. A
/// failed sync leaves the previous offset in place.
#[derive(Debug)]
pub struct ClockSync {
    state: Mutex<SyncState>,
    tolerance_ms: u64,
    resync_interval_ms: u64,
}

impl ClockSync {
    pub fn new(tolerance_ms: u64, resync_interval_ms: u64) -> Self {
        Self {
            state: Mutex::new(SyncState::default()),
            tolerance_ms,
            resync_interval_ms,
        }
    }

    pub fn needs_sync(&self, local_now_ms: u64) -> bool {
        let state = self.lock();
        match state.offset_ms {
            None => true,
            Some(_) => {
                state.stale
                    || local_now_ms.saturating_sub(state.last_sync_ms) >= self.resync_interval_ms
            }
        }
    }

    pub fn record_sample(&self, server_ms: u64, sent_at_ms: u64, received_at_ms: u64) -> ClockSample {
        let round_trip_ms = received_at_ms.saturating_sub(sent_at_ms);
        let midpoint = sent_at_ms + round_trip_ms / 2;
        let offset_ms = server_ms as i64 - midpoint as i64;

        let mut state = self.lock();
        let previous_offset_ms = state.offset_ms;
        let drift_exceeded = previous_offset_ms
            .map(|prev| (offset_ms - prev).unsigned_abs() > self.tolerance_ms)
            .unwrap_or(false);
        state.offset_ms = Some(offset_ms);
        state.last_sync_ms = received_at_ms;
        state.stale = false;
        drop(state);

        CLOCK_RESYNC_TOTAL.fetch_add(1, Ordering::Relaxed);
        if drift_exceeded {
            CLOCK_DRIFT_EXCEEDED_TOTAL.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                target: "desk",
                offset_ms,
                previous_offset_ms = previous_offset_ms.unwrap_or_default(),
                tolerance_ms = self.tolerance_ms,
                "exchange clock drift above tolerance"
            );
        } else {
            tracing::debug!(target: "desk", offset_ms, round_trip_ms, "exchange clock synced");
        }

        ClockSample {
            offset_ms,
            previous_offset_ms,
            round_trip_ms,
            drift_exceeded,
        }
    }

    /// Forces a resync before the next signed request.
    pub fn invalidate(&self) {
        self.lock().stale = true;
    }

    pub fn offset_ms(&self) -> Option<i64> {
        self.lock().offset_ms
    }

    pub fn exchange_now(&self, local_now_ms: u64) -> u64 {
        let offset = self.lock().offset_ms.unwrap_or(0);
        let adjusted = local_now_ms as i64 + offset;
        if adjusted < 0 { 0 } else { adjusted as u64 }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SyncState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(target: "desk", "clock sync lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
