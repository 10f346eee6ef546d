// ── Object graph ──
//
// Process-wide cache of every tracked configuration object, shared by
// `Arc` between the coordinator workers and the recompute hooks. All state
// sits behind one `parking_lot::RwLock`: an edge mutation touches two
// objects at once and must be atomic for readers. The lock is never held
// across an `.await`; store I/O happens first, mutation second.

mod state;
mod symmetry;
mod table;

pub use state::ApplyOutcome;
pub use symmetry::{SymmetryViolation, ViolationKind};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use self::state::GraphState;
use crate::error::CoreError;
use crate::model::{CachedObject, FqName, ObjectId, ObjectKey, ResourceType};
use crate::payload::{ObjectDocument, parse_document};
use crate::registry::ResourceRegistry;

/// Point-in-time counters for introspection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub objects: BTreeMap<ResourceType, usize>,
    pub total: usize,
    /// Back-refs parked for objects that are not cached.
    pub dangling_refs: usize,
    /// Children parked for parents that are not cached.
    pub dangling_children: usize,
    pub version: u64,
    pub last_resync: Option<DateTime<Utc>>,
}

/// The shadow graph.
pub struct ObjectGraph {
    registry: Arc<ResourceRegistry>,
    state: RwLock<GraphState>,

    /// Bumped once per committed mutation.
    version: watch::Sender<u64>,

    /// Completion time of the last full resync.
    last_resync: watch::Sender<Option<DateTime<Utc>>>,
}

impl ObjectGraph {
    pub fn new(registry: Arc<ResourceRegistry>) -> Self {
        let state = GraphState::new(&registry);
        let (version, _) = watch::channel(0u64);
        let (last_resync, _) = watch::channel(None);
        Self {
            registry,
            state: RwLock::new(state),
            version,
            last_resync,
        }
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    // ── Cache-only lookup ────────────────────────────────────────────

    /// Cached object by any identity form (cache id, UUID, joined name).
    pub fn get(&self, kind: &ResourceType, id: &ObjectId) -> Option<Arc<CachedObject>> {
        self.state
            .read()
            .get(&ObjectKey::new(kind.clone(), id.clone()))
            .cloned()
    }

    pub fn get_key(&self, key: &ObjectKey) -> Option<Arc<CachedObject>> {
        self.state.read().get(key).cloned()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.state.read().get(key).is_some()
    }

    /// Read view for synchronous traversal (dependency resolution).
    ///
    /// Holds the read lock until dropped; never keep it across an `.await`.
    pub fn read(&self) -> GraphView<'_> {
        GraphView {
            state: self.state.read(),
        }
    }

    // ── Read-through ─────────────────────────────────────────────────

    /// Cache hit, else read the object from its store and cache it.
    /// `Ok(None)` means the store does not have it either.
    pub async fn locate(
        &self,
        kind: &ResourceType,
        id: &ObjectId,
    ) -> Result<Option<Arc<CachedObject>>, CoreError> {
        if let Some(hit) = self.get(kind, id) {
            return Ok(Some(hit));
        }
        let Some(doc) = self.load(kind, id).await? else {
            debug!(kind = %kind, id = %id, "locate: not in store");
            return Ok(None);
        };
        self.store_document(doc)
    }

    /// [`locate`](Self::locate) by fully-qualified name.
    pub async fn locate_named(
        &self,
        kind: &ResourceType,
        fq_name: &FqName,
    ) -> Result<Option<Arc<CachedObject>>, CoreError> {
        if let Some(hit) = self.get(kind, &fq_name.as_id()) {
            return Ok(Some(hit));
        }
        let Some(doc) = self.load_named(kind, fq_name).await? else {
            debug!(kind = %kind, fq_name = %fq_name, "locate: name not in store");
            return Ok(None);
        };
        self.store_document(doc)
    }

    /// Read and parse an object from its store without touching the cache.
    pub async fn load(
        &self,
        kind: &ResourceType,
        id: &ObjectId,
    ) -> Result<Option<ObjectDocument>, CoreError> {
        let store = self.registry.store(kind)?;
        // A joined name does not say where its components split; read a
        // cached object through its UUID instead.
        let cached_uuid = id
            .as_name()
            .and_then(|_| self.get(kind, id))
            .and_then(|object| object.uuid().copied());
        let id = cached_uuid.map_or_else(|| id.clone(), ObjectId::Uuid);

        let Some(payload) = store.read(kind, &id).await? else {
            return Ok(None);
        };
        parse_document(&self.registry, kind, payload).await.map(Some)
    }

    /// [`load`](Self::load) by fully-qualified name.
    pub async fn load_named(
        &self,
        kind: &ResourceType,
        fq_name: &FqName,
    ) -> Result<Option<ObjectDocument>, CoreError> {
        let store = self.registry.store(kind)?;
        let Some(id) = store.resolve(kind, fq_name).await? else {
            return Ok(None);
        };
        self.load(kind, &id).await
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Insert or update an object from a parsed document, diffing its
    /// references against the cached state.
    pub fn apply(&self, doc: ObjectDocument) -> Result<ApplyOutcome, CoreError> {
        let outcome = self.state.write().apply(&self.registry, doc)?;
        if outcome.changed() {
            self.bump_version();
        }
        Ok(outcome)
    }

    /// Remove an object and every edge touching it. Idempotent: returns
    /// `None` when the object was not cached.
    pub fn delete(&self, key: &ObjectKey) -> Option<Arc<CachedObject>> {
        let removed = self.state.write().remove(key);
        if removed.is_some() {
            self.bump_version();
        }
        removed
    }

    pub fn add_ref(
        &self,
        from: &ObjectKey,
        reference: &str,
        peer: &ObjectKey,
    ) -> Result<bool, CoreError> {
        self.commit(|state| state.add_ref(from, reference, peer))
    }

    pub fn delete_ref(
        &self,
        from: &ObjectKey,
        reference: &str,
        peer: &ObjectKey,
    ) -> Result<bool, CoreError> {
        self.commit(|state| state.delete_ref(from, reference, peer))
    }

    /// Point a single-valued reference at `peer` (or at nothing).
    pub fn update_single_ref(
        &self,
        from: &ObjectKey,
        reference: &str,
        peer: Option<ObjectKey>,
    ) -> Result<bool, CoreError> {
        self.commit(|state| state.update_single_ref(from, reference, peer))
    }

    /// Make a multi-valued reference hold exactly `peers`.
    pub fn update_multiple_refs(
        &self,
        from: &ObjectKey,
        reference: &str,
        peers: &BTreeSet<ObjectKey>,
    ) -> Result<bool, CoreError> {
        self.commit(|state| state.update_multiple_refs(from, reference, peers))
    }

    /// Drop everything. Test and resync hook; nothing else resets the graph.
    pub fn clear(&self) {
        self.state.write().clear();
        self.bump_version();
    }

    // ── Introspection ────────────────────────────────────────────────

    /// Cache identities of every object of `kind`, sorted.
    pub fn ids(&self, kind: &ResourceType) -> Vec<ObjectId> {
        let state = self.state.read();
        let mut ids: Vec<ObjectId> = state
            .tables
            .get(kind)
            .map(|table| table.ids().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.state.read().tables.values().map(table::ObjectTable::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> GraphStats {
        let state = self.state.read();
        let objects: BTreeMap<ResourceType, usize> = state
            .tables
            .iter()
            .map(|(kind, table)| (kind.clone(), table.len()))
            .collect();
        let total = objects.values().sum();
        let dangling_refs = state
            .pending_back_refs
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeSet::len)
            .sum();
        let dangling_children = state.pending_children.values().map(BTreeSet::len).sum();

        GraphStats {
            objects,
            total,
            dangling_refs,
            dangling_children,
            version: *self.version.borrow(),
            last_resync: *self.last_resync.borrow(),
        }
    }

    /// Every edge whose forward and reverse halves disagree.
    pub fn check_symmetry(&self) -> Vec<SymmetryViolation> {
        symmetry::audit(&self.state.read())
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Subscribe to version bumps.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn last_resync(&self) -> Option<DateTime<Utc>> {
        *self.last_resync.borrow()
    }

    pub(crate) fn mark_resynced(&self) {
        self.last_resync.send_modify(|t| *t = Some(Utc::now()));
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn store_document(&self, doc: ObjectDocument) -> Result<Option<Arc<CachedObject>>, CoreError> {
        let key = doc.key.clone();
        self.apply(doc)?;
        Ok(self.get_key(&key))
    }

    fn commit<F>(&self, mutate: F) -> Result<bool, CoreError>
    where
        F: FnOnce(&mut GraphState) -> Result<bool, CoreError>,
    {
        let changed = mutate(&mut *self.state.write())?;
        if changed {
            self.bump_version();
        }
        Ok(changed)
    }

    fn bump_version(&self) {
        // `send_modify` updates unconditionally, even with zero receivers.
        self.version.send_modify(|v| *v += 1);
    }
}

// ── GraphView ────────────────────────────────────────────────────────

/// Read-locked view of the graph.
pub struct GraphView<'a> {
    state: RwLockReadGuard<'a, GraphState>,
}

impl GraphView<'_> {
    pub fn get(&self, key: &ObjectKey) -> Option<&CachedObject> {
        self.state.get(key).map(Arc::as_ref)
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.state.get(key).is_some()
    }

    /// Canonical key for any identity form of a cached object.
    pub fn canonical(&self, key: &ObjectKey) -> Option<ObjectKey> {
        self.state.canonical(key)
    }

    /// Every cached object, grouped by type.
    pub fn objects(&self) -> impl Iterator<Item = &CachedObject> {
        self.state
            .tables
            .values()
            .flat_map(table::ObjectTable::values)
            .map(Arc::as_ref)
    }
}
