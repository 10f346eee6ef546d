// ── Recompute hooks ──
//
// Resource-specific derivation logic lives outside the engine. The
// coordinator hands each affected object to the hook registered for its
// type; a hook error is logged and traced but never retried.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::graph::ObjectGraph;
use crate::model::{CachedObject, ResourceType};

/// Error type hooks may return. Anything `std::error::Error` works.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Derives secondary state for one object from the current graph.
///
/// Hooks may read anything in the graph and may write back to the store;
/// those writes arrive later as ordinary change events.
#[async_trait]
pub trait RecomputeHook: Send + Sync {
    async fn recompute(&self, graph: &ObjectGraph, object: Arc<CachedObject>) -> Result<(), HookError>;
}

/// Adapter turning a synchronous closure into a [`RecomputeHook`].
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> RecomputeHook for FnHook<F>
where
    F: Fn(&ObjectGraph, &CachedObject) -> Result<(), HookError> + Send + Sync,
{
    async fn recompute(&self, graph: &ObjectGraph, object: Arc<CachedObject>) -> Result<(), HookError> {
        (self.0)(graph, &*object)
    }
}

/// Per-type hook table with an optional fallback.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: BTreeMap<ResourceType, Arc<dyn RecomputeHook>>,
    fallback: Option<Arc<dyn RecomputeHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` for `kind`, replacing any previous one.
    pub fn register(mut self, kind: impl Into<ResourceType>, hook: Arc<dyn RecomputeHook>) -> Self {
        self.hooks.insert(kind.into(), hook);
        self
    }

    /// Hook used for types without a dedicated one.
    pub fn fallback(mut self, hook: Arc<dyn RecomputeHook>) -> Self {
        self.fallback = Some(hook);
        self
    }

    pub fn hook_for(&self, kind: &ResourceType) -> Option<&Arc<dyn RecomputeHook>> {
        self.hooks.get(kind).or(self.fallback.as_ref())
    }

    /// Types with a dedicated hook.
    pub fn kinds(&self) -> impl Iterator<Item = &ResourceType> {
        self.hooks.keys()
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("kinds", &self.hooks.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl RecomputeHook for Noop {
        async fn recompute(&self, _: &ObjectGraph, _: Arc<CachedObject>) -> Result<(), HookError> {
            Ok(())
        }
    }

    #[test]
    fn dedicated_hook_wins_over_fallback() {
        let dedicated: Arc<dyn RecomputeHook> = Arc::new(Noop);
        let fallback: Arc<dyn RecomputeHook> = Arc::new(FnHook(|_: &ObjectGraph, _: &CachedObject| Ok::<(), HookError>(())));
        let hooks = HookRegistry::new()
            .register("route_target", Arc::clone(&dedicated))
            .fallback(Arc::clone(&fallback));

        assert!(Arc::ptr_eq(hooks.hook_for(&"route_target".into()).unwrap(), &dedicated));
        assert!(Arc::ptr_eq(hooks.hook_for(&"virtual_network".into()).unwrap(), &fallback));
    }

    #[test]
    fn no_fallback_means_no_hook() {
        let hooks = HookRegistry::new().register("route_target", Arc::new(Noop));
        assert!(hooks.hook_for(&"virtual_network".into()).is_none());
        assert!(!hooks.has_fallback());
        assert_eq!(hooks.kinds().count(), 1);
    }
}
