//! Structured audit trail.
//!
//! Every submission, fill, cancellation and error goes through `AuditLog::emit`,
//! which stamps a sequence id that increases by one per event, fans the event out
//! to the registered sinks, and mirrors it to `tracing`. Sinks persist; the core
//! never reads them back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    OrderSubmitted,
    OrderRejected,
    OrderStatusChanged,
    OrderFilled,
    OrderCanceled,
    OrderFailed,
    OrdersCanceledAll,
    OcoPlaced,
    OcoResolved,
    ClockResynced,
    TwapStarted,
    TwapSliceSubmitted,
    TwapCompleted,
    TwapCanceled,
    TwapFailed,
    GridStarted,
    GridOrderPlaced,
    GridLevelFilled,
    GridLevelStalled,
    GridStopped,
    GridFailed,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::OrderSubmitted => "order_submitted",
            EventType::OrderRejected => "order_rejected",
            EventType::OrderStatusChanged => "order_status_changed",
            EventType::OrderFilled => "order_filled",
            EventType::OrderCanceled => "order_canceled",
            EventType::OrderFailed => "order_failed",
            EventType::OrdersCanceledAll => "orders_canceled_all",
            EventType::OcoPlaced => "oco_placed",
            EventType::OcoResolved => "oco_resolved",
            EventType::ClockResynced => "clock_resynced",
            EventType::TwapStarted => "twap_started",
            EventType::TwapSliceSubmitted => "twap_slice_submitted",
            EventType::TwapCompleted => "twap_completed",
            EventType::TwapCanceled => "twap_canceled",
            EventType::TwapFailed => "twap_failed",
            EventType::GridStarted => "grid_started",
            EventType::GridOrderPlaced => "grid_order_placed",
            EventType::GridLevelFilled => "grid_level_filled",
            EventType::GridLevelStalled => "grid_level_stalled",
            EventType::GridStopped => "grid_stopped",
            EventType::GridFailed => "grid_failed",
        }
    }

    fn is_failure(self) -> bool {
        matches!(
            self,
            EventType::OrderRejected
                | EventType::OrderFailed
                | EventType::TwapFailed
                | EventType::GridFailed
        )
    }

    fn is_warning(self) -> bool {
        matches!(self, EventType::GridLevelStalled | EventType::ClockResynced)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub seq: u64,
    pub timestamp_ms: u64,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event sink error: {message}")]
pub struct SinkError {
    pub message: String,
}

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<(), SinkError>;
}

pub struct AuditLog {
    clock: Arc<dyn Clock>,
    sinks: Vec<Arc<dyn EventSink>>,
    next_seq: Mutex<u64>,
    sink_errors: AtomicU64,
}

impl AuditLog {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            sinks: Vec::new(),
            next_seq: Mutex::new(1),
            sink_errors: AtomicU64::new(0),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Records one event and returns its sequence id. A failing sink is counted
    /// and logged; it never fails the trading operation that produced the event.
    pub fn emit(&self, event_type: EventType, order_id: Option<&str>, details: Value) -> u64 {
        // The lock spans dispatch so sinks observe events in sequence order.
        let mut next_seq = match self.next_seq.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(target: "desk", "audit sequence lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let seq = *next_seq;
        *next_seq += 1;

        let event = AuditEvent {
            seq,
            timestamp_ms: self.clock.now_ms(),
            event_type,
            order_id: order_id.map(str::to_string),
            details,
        };
        trace_event(&event);

        for sink in &self.sinks {
            if let Err(err) = sink.record(&event) {
                self.sink_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(target: "desk", seq, error = %err, "audit sink rejected event");
            }
        }
        seq
    }

    pub fn sink_errors_total(&self) -> u64 {
        self.sink_errors.load(Ordering::Relaxed)
    }
}

fn trace_event(event: &AuditEvent) {
    let order_id = event.order_id.as_deref().unwrap_or("-");
    let name = event.event_type.as_str();
    if event.event_type.is_failure() {
        tracing::error!(target: "desk", seq = event.seq, kind = name, order_id, details = %event.details, "audit");
    } else if event.event_type.is_warning() {
        tracing::warn!(target: "desk", seq = event.seq, kind = name, order_id, details = %event.details, "audit");
    } else {
        tracing::info!(target: "desk", seq = event.seq, kind = name, order_id, details = %event.details, "audit");
    }
}

/// In-memory sink for tests and for callers that poll recent activity.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn of_type(&self, event_type: EventType) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.event_type == event_type)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: &AuditEvent) -> Result<(), SinkError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| SinkError::new("memory sink poisoned"))?;
        events.push(event.clone());
        Ok(())
    }
}
