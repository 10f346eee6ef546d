// ── Reconciliation coordinator ──
//
// Drives one change notification end to end: load from the store, diff
// into the graph, resolve dependencies, invoke recompute hooks, emit one
// trace record. Every store read for a notification happens before the
// graph is mutated, so a transient failure can retry the whole thing.

mod cascade;
mod partition;
mod sync;

pub use partition::PartitionedDispatcher;
pub use sync::SyncReport;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use shadowgraph_api::{FeedStatus, RawChangeEvent};
use strum::Display;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use self::cascade::CascadeBudget;
use crate::error::CoreError;
use crate::graph::ObjectGraph;
use crate::hooks::HookRegistry;
use crate::model::{CachedObject, ChangeEvent, ObjectKey, Operation};
use crate::payload::ObjectDocument;
use crate::reaction::{DependencyResolver, DependencySet, ReactionMap, Scope};
use crate::trace::{TraceOutcome, TraceRecord, TraceSink};

const MAX_ATTEMPTS: u32 = 2;

// ── State ────────────────────────────────────────────────────────────

/// Lifecycle observable by supervisors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CoordinatorState {
    /// Events are refused until the first full resync completes.
    WaitingForInitialSync,
    Ready,
    /// Terminal. A transient failure outlived its retry.
    Failed,
}

// ── Config ───────────────────────────────────────────────────────────

/// Coordinator tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Worker count for the partitioned dispatcher.
    pub partitions: usize,
    /// Per-partition queue depth.
    pub queue_depth: usize,
    /// Notifications allowed per correlation id inside `cascade_window`.
    /// Zero disables the budget.
    pub max_cascade_events: u32,
    pub cascade_window: Duration,
    /// Run every hook once after the initial resync.
    pub recompute_on_sync: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            partitions: 4,
            queue_depth: 256,
            max_cascade_events: 1000,
            cascade_window: Duration::from_secs(60),
            recompute_on_sync: true,
        }
    }
}

// ── Coordinator ──────────────────────────────────────────────────────

/// The reconciliation engine.
///
/// Cheaply cloneable; clones share the graph, hooks, sinks and state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    graph: Arc<ObjectGraph>,
    reactions: Arc<ReactionMap>,
    hooks: HookRegistry,
    sink: Arc<dyn TraceSink>,
    config: CoordinatorConfig,
    state: watch::Sender<CoordinatorState>,
    failure: Mutex<Option<String>>,
    cascade: CascadeBudget,
}

/// Result of the mutation phase of one notification.
struct Reconciled {
    outcome: TraceOutcome,
    deps: DependencySet,
}

impl Reconciled {
    fn done(outcome: TraceOutcome) -> Self {
        Self {
            outcome,
            deps: DependencySet::new(),
        }
    }
}

impl Coordinator {
    /// Build a coordinator. Hooks registered for types the graph's registry
    /// does not know are rejected.
    pub fn new(
        graph: Arc<ObjectGraph>,
        reactions: Arc<ReactionMap>,
        hooks: HookRegistry,
        sink: Arc<dyn TraceSink>,
        config: CoordinatorConfig,
    ) -> Result<Self, CoreError> {
        for kind in hooks.kinds() {
            graph.registry().require(kind)?;
        }
        if config.partitions == 0 || config.queue_depth == 0 {
            return Err(CoreError::Registration {
                message: "partitions and queue_depth must be at least 1".into(),
            });
        }

        let (state, _) = watch::channel(CoordinatorState::WaitingForInitialSync);
        let cascade = CascadeBudget::new(config.max_cascade_events, config.cascade_window);
        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                graph,
                reactions,
                hooks,
                sink,
                config,
                state,
                failure: Mutex::new(None),
                cascade,
            }),
        })
    }

    pub fn graph(&self) -> &Arc<ObjectGraph> {
        &self.inner.graph
    }

    pub fn reactions(&self) -> &ReactionMap {
        &self.inner.reactions
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub fn state(&self) -> CoordinatorState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CoordinatorState> {
        self.inner.state.subscribe()
    }

    /// Why the coordinator entered [`CoordinatorState::Failed`].
    pub fn failure_reason(&self) -> Option<String> {
        self.inner.failure.lock().clone()
    }

    /// Signal that the initial resync is complete. Only moves
    /// `WaitingForInitialSync` to `Ready`; a no-op otherwise.
    pub fn mark_synced(&self) {
        let moved = self.inner.state.send_if_modified(|state| {
            if *state == CoordinatorState::WaitingForInitialSync {
                *state = CoordinatorState::Ready;
                true
            } else {
                false
            }
        });
        if moved {
            info!("coordinator ready");
        }
    }

    /// Wait until the coordinator leaves `WaitingForInitialSync`.
    pub async fn wait_ready(&self) -> Result<(), CoreError> {
        let mut rx = self.subscribe_state();
        let state = *rx
            .wait_for(|s| *s != CoordinatorState::WaitingForInitialSync)
            .await
            .map_err(|_| CoreError::Internal("coordinator state channel closed".into()))?;
        match state {
            CoordinatorState::Failed => Err(self.failed_error()),
            _ => Ok(()),
        }
    }

    fn fail(&self, reason: String) {
        error!(reason = %reason, "coordinator failed");
        *self.inner.failure.lock() = Some(reason);
        self.inner.state.send_replace(CoordinatorState::Failed);
    }

    fn failed_error(&self) -> CoreError {
        CoreError::Failed {
            reason: self.failure_reason().unwrap_or_else(|| "unknown".into()),
        }
    }

    fn ensure_ready(&self) -> Result<(), CoreError> {
        match self.state() {
            CoordinatorState::Ready => Ok(()),
            CoordinatorState::WaitingForInitialSync => Err(CoreError::NotReady),
            CoordinatorState::Failed => Err(self.failed_error()),
        }
    }

    // ── Per-notification processing ──────────────────────────────────

    /// Process one notification to completion.
    ///
    /// Returns the trace record on every handled outcome, including hook
    /// errors and malformed payloads. Errors only for `NotReady` and for
    /// the terminal `Failed` transition.
    pub async fn process(&self, event: ChangeEvent) -> Result<TraceRecord, CoreError> {
        self.ensure_ready()?;

        let started_at = Utc::now();
        let clock = Instant::now();
        let mut record = TraceRecord {
            resource_type: event.resource_type.clone(),
            identity: event.identity.clone(),
            operation: event.operation,
            correlation_id: event.correlation_id.clone(),
            recomputed: DependencySet::new(),
            duration_ms: 0,
            error: None,
            attempts: 0,
            outcome: TraceOutcome::Ignored,
            started_at,
        };

        if !self.inner.graph.registry().contains(&event.resource_type) {
            warn!(kind = %event.resource_type, id = %event.identity, "unknown resource type, dropped");
            return Ok(self.finish(record, clock));
        }
        let admitted = self.inner.cascade.admit(event.correlation_id.as_deref());

        let reconciled = loop {
            record.attempts += 1;
            match self.reconcile(&event).await {
                Ok(reconciled) => break reconciled,
                Err(e) if e.is_transient() && record.attempts < MAX_ATTEMPTS => {
                    warn!(
                        kind = %event.resource_type,
                        id = %event.identity,
                        attempt = record.attempts,
                        error = %e,
                        "transient failure, retrying notification"
                    );
                }
                Err(e) if e.is_transient() => {
                    record.outcome = TraceOutcome::Fatal;
                    record.error = Some(e.to_string());
                    self.fail(format!(
                        "{} {} {}: {e}",
                        event.operation, event.resource_type, event.identity
                    ));
                    self.finish(record, clock);
                    return Err(self.failed_error());
                }
                Err(e) => {
                    warn!(kind = %event.resource_type, id = %event.identity, error = %e, "notification failed");
                    record.outcome = TraceOutcome::Failed;
                    record.error = Some(e.to_string());
                    return Ok(self.finish(record, clock));
                }
            }
        };

        // The graph always converges; only the hooks are held back.
        if !admitted {
            warn!(
                kind = %event.resource_type,
                id = %event.identity,
                correlation_id = event.correlation_id.as_deref().unwrap_or("-"),
                skipped = reconciled.deps.len(),
                "cascade budget exhausted, recompute suppressed"
            );
            record.outcome = TraceOutcome::CascadeSuppressed;
            return Ok(self.finish(record, clock));
        }

        record.outcome = reconciled.outcome;
        record.error = self.recompute_all(&reconciled.deps).await;
        record.recomputed = reconciled.deps;
        Ok(self.finish(record, clock))
    }

    /// Mutation phase. Store I/O first, graph mutation last.
    async fn reconcile(&self, event: &ChangeEvent) -> Result<Reconciled, CoreError> {
        match event.operation {
            // A redelivered CREATE for a cached object converges like an UPDATE.
            Operation::Create | Operation::Update | Operation::UpdateImplicit => match self.cached_key(event) {
                Some(key) => self.update(event, key).await,
                None => self.create(event).await,
            },
            Operation::Delete => Ok(self.delete(event)),
        }
    }

    async fn create(&self, event: &ChangeEvent) -> Result<Reconciled, CoreError> {
        let Some(doc) = self.fetch(event).await? else {
            debug!(kind = %event.resource_type, id = %event.identity, "create: already gone");
            return Ok(Reconciled::done(TraceOutcome::Gone));
        };
        let key = doc.key.clone();
        self.inner.graph.apply(doc)?;

        Ok(Reconciled {
            outcome: TraceOutcome::Recomputed,
            deps: self.resolve(&key, Scope::DownstreamRoot),
        })
    }

    async fn update(&self, event: &ChangeEvent, key: ObjectKey) -> Result<Reconciled, CoreError> {
        let Some(doc) = self.fetch(event).await? else {
            debug!(key = %key, "update: gone from store, awaiting delete");
            return Ok(Reconciled::done(TraceOutcome::Gone));
        };

        let old_deps = self.resolve(&key, Scope::Full);
        let new_key = doc.key.clone();
        if !self.inner.graph.apply(doc)?.changed() {
            debug!(key = %key, "update: nothing changed");
            return Ok(Reconciled::done(TraceOutcome::FastPath));
        }
        let new_deps = self.resolve(&new_key, Scope::Full);

        Ok(Reconciled {
            outcome: TraceOutcome::Recomputed,
            deps: old_deps.union(new_deps),
        })
    }

    fn delete(&self, event: &ChangeEvent) -> Reconciled {
        let Some(key) = self.cached_key(event) else {
            debug!(kind = %event.resource_type, id = %event.identity, "delete: not cached");
            return Reconciled::done(TraceOutcome::Ignored);
        };

        let deps = self.resolve(&key, Scope::Full);
        self.inner.graph.delete(&key);
        Reconciled {
            outcome: TraceOutcome::Recomputed,
            deps,
        }
    }

    /// Recompute phase: run the hook of every affected object that is
    /// still cached. Returns the first hook error.
    async fn recompute_all(&self, deps: &DependencySet) -> Option<String> {
        let mut first_error = None;
        for key in deps.iter() {
            let Some(object) = self.inner.graph.get_key(&key) else {
                continue;
            };
            if let Err(message) = self.recompute(object).await {
                first_error.get_or_insert(message);
            }
        }
        first_error
    }

    async fn recompute(&self, object: Arc<CachedObject>) -> Result<(), String> {
        let Some(hook) = self.inner.hooks.hook_for(object.kind()) else {
            return Ok(());
        };
        let key = object.key().clone();
        hook.recompute(&self.inner.graph, object).await.map_err(|e| {
            let err = CoreError::Recompute {
                key,
                message: e.to_string(),
            };
            warn!(error = %err, "recompute hook failed");
            err.to_string()
        })
    }

    // ── Helpers ──────────────────────────────────────────────────────

    /// Canonical key of the event's object if cached, by identity or name.
    fn cached_key(&self, event: &ChangeEvent) -> Option<ObjectKey> {
        let view = self.inner.graph.read();
        let by_id = ObjectKey::new(event.resource_type.clone(), event.identity.clone());
        view.canonical(&by_id).or_else(|| {
            if event.fq_name.is_empty() {
                return None;
            }
            view.canonical(&ObjectKey::new(
                event.resource_type.clone(),
                event.fq_name.as_id(),
            ))
        })
    }

    async fn fetch(&self, event: &ChangeEvent) -> Result<Option<ObjectDocument>, CoreError> {
        let graph = &self.inner.graph;
        if event.identity.as_name().is_some() && !event.fq_name.is_empty() {
            graph.load_named(&event.resource_type, &event.fq_name).await
        } else {
            graph.load(&event.resource_type, &event.identity).await
        }
    }

    fn resolve(&self, key: &ObjectKey, scope: Scope) -> DependencySet {
        let view = self.inner.graph.read();
        DependencyResolver::new(&self.inner.reactions).evaluate(&view, key, scope)
    }

    fn finish(&self, mut record: TraceRecord, clock: Instant) -> TraceRecord {
        record.duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.inner.sink.record(&record);
        record
    }

    // ── Event loop ───────────────────────────────────────────────────

    /// Resync, then consume raw feed events until cancelled, the feed
    /// closes, or the coordinator fails.
    pub async fn run(
        &self,
        events: mpsc::Receiver<RawChangeEvent>,
        cancel: CancellationToken,
    ) -> Result<(), CoreError> {
        self.follow(events, None, cancel).await
    }

    /// Like [`run`](Self::run) for a live feed: a feed that ran out of
    /// reconnect attempts moves the coordinator to `Failed` instead of
    /// ending the loop cleanly.
    pub async fn run_feed(
        &self,
        events: mpsc::Receiver<RawChangeEvent>,
        status: watch::Receiver<FeedStatus>,
        cancel: CancellationToken,
    ) -> Result<(), CoreError> {
        self.follow(events, Some(status), cancel).await
    }

    async fn follow(
        &self,
        events: mpsc::Receiver<RawChangeEvent>,
        status: Option<watch::Receiver<FeedStatus>>,
        cancel: CancellationToken,
    ) -> Result<(), CoreError> {
        let report = self.initial_sync().await?;
        info!(
            objects = report.objects,
            pruned = report.pruned,
            duration_ms = report.duration_ms,
            "initial resync complete"
        );

        let dispatcher = PartitionedDispatcher::spawn(self, &cancel);
        dispatcher.ingest(events, &cancel).await;
        dispatcher.join().await;

        let last_status = status.as_ref().map(|status| status.borrow().clone());
        if let Some(FeedStatus::GaveUp { attempts, error }) = last_status {
            self.fail(format!(
                "change feed gave up after {attempts} reconnect attempts: {error}"
            ));
        }

        match self.state() {
            CoordinatorState::Failed => Err(self.failed_error()),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .field("hooks", &self.inner.hooks)
            .finish_non_exhaustive()
    }
}
