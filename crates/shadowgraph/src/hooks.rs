//! Recompute hook used when no resource-specific derivation is linked in.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use shadowgraph_core::{CachedObject, HookError, ObjectGraph, RecomputeHook};

/// Logs each recomputation with the object's current edge counts.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHook;

#[async_trait]
impl RecomputeHook for LoggingHook {
    async fn recompute(&self, _graph: &ObjectGraph, object: Arc<CachedObject>) -> Result<(), HookError> {
        let refs: usize = object.refs().values().map(|slot| slot.targets().count()).sum();
        let back_refs: usize = object.back_refs().values().map(std::collections::BTreeSet::len).sum();
        debug!(
            kind = %object.kind(),
            id = %object.id(),
            fq_name = %object.fq_name(),
            refs,
            back_refs,
            "recompute"
        );
        Ok(())
    }
}
