// ── Reconciliation trace ──
//
// One record per processed notification: what changed, what was
// recomputed, how long it took and how it ended. Sinks are append-only.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use strum::Display;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::model::{ObjectId, Operation, ResourceType};
use crate::reaction::DependencySet;

const BROADCAST_CAPACITY: usize = 256;

/// How a notification ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TraceOutcome {
    /// Dependencies were resolved and hooks invoked.
    Recomputed,
    /// UPDATE changed nothing observable.
    FastPath,
    /// The object was already gone from the store.
    Gone,
    /// Unknown type or nothing cached to act on.
    Ignored,
    /// Applied to the graph, but recompute was skipped by the
    /// per-correlation cascade budget.
    CascadeSuppressed,
    /// A non-transient error; the event still counts as handled.
    Failed,
    /// Transient failure persisted past the retry.
    Fatal,
}

/// One append-only observability record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRecord {
    pub resource_type: ResourceType,
    pub identity: ObjectId,
    pub operation: Operation,
    pub correlation_id: Option<String>,
    pub recomputed: DependencySet,
    pub duration_ms: u64,
    /// First error seen, including hook errors.
    pub error: Option<String>,
    pub attempts: u32,
    pub outcome: TraceOutcome,
    pub started_at: DateTime<Utc>,
}

/// Receives trace records. Implementations must not block.
pub trait TraceSink: Send + Sync {
    fn record(&self, record: &TraceRecord);
}

// ── TracingSink ──────────────────────────────────────────────────────

/// Logs every record through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&self, record: &TraceRecord) {
        let recomputed = record.recomputed.len();
        if let Some(error) = &record.error {
            warn!(
                kind = %record.resource_type,
                id = %record.identity,
                op = %record.operation,
                correlation_id = record.correlation_id.as_deref().unwrap_or("-"),
                outcome = %record.outcome,
                recomputed,
                attempts = record.attempts,
                duration_ms = record.duration_ms,
                error = %error,
                "reconcile"
            );
        } else {
            info!(
                kind = %record.resource_type,
                id = %record.identity,
                op = %record.operation,
                correlation_id = record.correlation_id.as_deref().unwrap_or("-"),
                outcome = %record.outcome,
                recomputed,
                attempts = record.attempts,
                duration_ms = record.duration_ms,
                "reconcile"
            );
        }
    }
}

// ── TraceBuffer ──────────────────────────────────────────────────────

/// Bounded in-memory history of recent records, with live fan-out.
pub struct TraceBuffer {
    capacity: usize,
    records: Mutex<VecDeque<Arc<TraceRecord>>>,
    live: broadcast::Sender<Arc<TraceRecord>>,
}

impl TraceBuffer {
    pub fn new(capacity: usize) -> Self {
        let (live, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            live,
        }
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<Arc<TraceRecord>> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn last(&self) -> Option<Arc<TraceRecord>> {
        self.records.lock().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TraceRecord>> {
        self.live.subscribe()
    }
}

impl TraceSink for TraceBuffer {
    fn record(&self, record: &TraceRecord) {
        if self.capacity == 0 {
            return;
        }
        let record = Arc::new(record.clone());
        {
            let mut records = self.records.lock();
            while records.len() >= self.capacity {
                records.pop_front();
            }
            records.push_back(Arc::clone(&record));
        }
        // No subscribers is fine.
        let _ = self.live.send(record);
    }
}

// ── SinkSet ──────────────────────────────────────────────────────────

/// Fans one record out to several sinks.
#[derive(Default, Clone)]
pub struct SinkSet {
    sinks: Vec<Arc<dyn TraceSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl TraceSink for SinkSet {
    fn record(&self, record: &TraceRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(name: &str) -> TraceRecord {
        TraceRecord {
            resource_type: "route_target".into(),
            identity: ObjectId::Name(name.into()),
            operation: Operation::Update,
            correlation_id: None,
            recomputed: DependencySet::new(),
            duration_ms: 1,
            error: None,
            attempts: 1,
            outcome: TraceOutcome::FastPath,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn buffer_keeps_the_newest_records() {
        let buffer = TraceBuffer::new(2);
        for name in ["a", "b", "c"] {
            buffer.record(&record(name));
        }
        let ids: Vec<String> = buffer
            .snapshot()
            .iter()
            .map(|r| r.identity.to_string())
            .collect();
        assert_eq!(ids, ["b", "c"]);
        assert_eq!(buffer.last().unwrap().identity.to_string(), "c");
    }

    #[tokio::test]
    async fn buffer_broadcasts_live_records() {
        let buffer = TraceBuffer::new(8);
        let mut rx = buffer.subscribe();
        buffer.record(&record("a"));
        assert_eq!(rx.recv().await.unwrap().identity.to_string(), "a");
    }

    #[test]
    fn sink_set_fans_out() {
        let first = Arc::new(TraceBuffer::new(4));
        let second = Arc::new(TraceBuffer::new(4));
        let sinks = SinkSet::new()
            .with(first.clone())
            .with(second.clone())
            .with(Arc::new(TracingSink));
        sinks.record(&record("a"));
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(sinks.len(), 3);
    }

    #[test]
    fn outcome_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(TraceOutcome::CascadeSuppressed).unwrap(),
            serde_json::json!("cascade_suppressed")
        );
    }
}
