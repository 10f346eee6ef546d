// ── Initial resync ──
//
// Enumerate every registered type, upsert what the store has, prune what
// it no longer has, then open the gate for change events.

use std::collections::BTreeSet;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Coordinator, MAX_ATTEMPTS};
use crate::error::CoreError;
use crate::model::ObjectKey;

/// What one resync did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Objects present in the store and now cached.
    pub objects: usize,
    /// Cached objects removed because the store no longer has them.
    pub pruned: usize,
    /// Hooks invoked by the post-sync recompute pass.
    pub recomputed: usize,
    pub hook_errors: usize,
    pub attempts: u32,
    pub duration_ms: u64,
}

impl Coordinator {
    /// Full resync against the stores, then `Ready`.
    ///
    /// A transient failure retries the whole resync once; a second one
    /// moves the coordinator to `Failed`.
    pub async fn initial_sync(&self) -> Result<SyncReport, CoreError> {
        let clock = Instant::now();
        let mut attempts = 0;

        let mut report = loop {
            attempts += 1;
            match self.resync().await {
                Ok(report) => break report,
                Err(e) if e.is_transient() && attempts < MAX_ATTEMPTS => {
                    warn!(attempt = attempts, error = %e, "transient failure during resync, retrying");
                }
                Err(e) if e.is_transient() => {
                    self.fail(format!("initial resync: {e}"));
                    return Err(self.failed_error());
                }
                Err(e) => return Err(e),
            }
        };

        if self.inner.config.recompute_on_sync {
            let keys: Vec<ObjectKey> = {
                let view = self.inner.graph.read();
                view.objects().map(|object| object.key().clone()).collect()
            };
            for key in keys {
                let Some(object) = self.inner.graph.get_key(&key) else {
                    continue;
                };
                if self.inner.hooks.hook_for(object.kind()).is_none() {
                    continue;
                }
                report.recomputed += 1;
                if self.recompute(object).await.is_err() {
                    report.hook_errors += 1;
                }
            }
        }

        report.attempts = attempts;
        report.duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.inner.graph.mark_resynced();
        self.mark_synced();
        Ok(report)
    }

    async fn resync(&self) -> Result<SyncReport, CoreError> {
        let graph = &self.inner.graph;
        let registry = graph.registry();
        let mut report = SyncReport::default();
        let mut live: BTreeSet<ObjectKey> = BTreeSet::new();

        for kind in registry.kinds() {
            let store = registry.store(kind)?;
            let listed = store.list(kind).await?;
            debug!(kind = %kind, count = listed.len(), "resync: listed");

            for (fq_name, id) in listed {
                let Some(doc) = graph.load(kind, &id).await? else {
                    debug!(kind = %kind, fq_name = %fq_name, "resync: vanished after listing");
                    continue;
                };
                live.insert(doc.key.clone());
                graph.apply(doc)?;
                report.objects += 1;
            }
        }

        let stale: Vec<ObjectKey> = {
            let view = graph.read();
            view.objects()
                .map(|object| object.key().clone())
                .filter(|key| !live.contains(key))
                .collect()
        };
        for key in stale {
            if graph.delete(&key).is_some() {
                report.pruned += 1;
            }
        }

        info!(objects = report.objects, pruned = report.pruned, "resync: graph rebuilt");
        Ok(report)
    }
}
