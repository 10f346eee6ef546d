// ── Graph state and edge primitives ──
//
// Everything here runs under the graph's write lock. `add_ref` and
// `delete_ref` are the only functions that touch forward references;
// every other mutation (payload diff, delete) is expressed through them
// or through the matching back-reference helpers, which keeps
// `B in A.refs[R] <=> A in B.back_refs[R]` true after every call.
//
// Edges pointing at objects that are not cached yet are "dangling": the
// forward half is stored on the referrer as usual, the reverse half is
// parked in `pending_back_refs` (or `pending_children`) and adopted when
// the peer is inserted.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use super::table::ObjectTable;
use crate::error::CoreError;
use crate::model::{CachedObject, ObjectId, ObjectKey, RefSlot, ResourceType};
use crate::payload::ObjectDocument;
use crate::registry::{Cardinality, ResourceRegistry, ResourceSchema};

/// Result of applying one document to the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The object was not cached before.
    Inserted,
    /// The object was cached; `changed` is false when nothing observable
    /// (payload, name, references, parent) differs.
    Updated { changed: bool },
}

impl ApplyOutcome {
    pub fn changed(self) -> bool {
        match self {
            Self::Inserted => true,
            Self::Updated { changed } => changed,
        }
    }
}

pub(crate) type BackRefs = BTreeMap<String, BTreeSet<ObjectKey>>;

pub(crate) struct GraphState {
    pub(crate) tables: BTreeMap<ResourceType, ObjectTable>,
    /// Reverse halves of edges whose target is not cached.
    pub(crate) pending_back_refs: BTreeMap<ObjectKey, BackRefs>,
    /// Children whose parent is not cached, keyed by the parent.
    pub(crate) pending_children: BTreeMap<ObjectKey, BTreeSet<ObjectKey>>,
}

impl GraphState {
    pub(crate) fn new(registry: &ResourceRegistry) -> Self {
        Self {
            tables: registry
                .kinds()
                .map(|kind| (kind.clone(), ObjectTable::default()))
                .collect(),
            pending_back_refs: BTreeMap::new(),
            pending_children: BTreeMap::new(),
        }
    }

    // ── Lookup ───────────────────────────────────────────────────────

    pub(crate) fn get(&self, key: &ObjectKey) -> Option<&Arc<CachedObject>> {
        self.tables.get(&key.kind)?.get(&key.id)
    }

    /// True when `key` is cached under exactly this identity.
    pub(crate) fn contains(&self, key: &ObjectKey) -> bool {
        self.tables
            .get(&key.kind)
            .is_some_and(|table| table.contains(&key.id))
    }

    /// Canonical key for any identity form of a cached object.
    pub(crate) fn canonical(&self, key: &ObjectKey) -> Option<ObjectKey> {
        let id = self.tables.get(&key.kind)?.canonical(&key.id)?;
        Some(ObjectKey::new(key.kind.clone(), id.clone()))
    }

    /// Key a peer is cached under, whichever identity form names it.
    /// Uncached peers keep the key they were named by.
    fn peer_key(&self, peer: &ObjectKey) -> ObjectKey {
        self.canonical(peer).unwrap_or_else(|| peer.clone())
    }

    fn object_mut(&mut self, key: &ObjectKey) -> Option<&mut CachedObject> {
        self.tables.get_mut(&key.kind)?.get_mut(&key.id)
    }

    fn require(&self, key: &ObjectKey) -> Result<&Arc<CachedObject>, CoreError> {
        self.get(key)
            .ok_or_else(|| CoreError::NotCached { key: key.clone() })
    }

    // ── Reference primitives ─────────────────────────────────────────

    /// Record `from -[reference]-> peer` and its back-reference. For a
    /// single-valued reference the previous peer loses its back-reference.
    /// Returns `false` when the edge already existed.
    pub(crate) fn add_ref(
        &mut self,
        from: &ObjectKey,
        reference: &str,
        peer: &ObjectKey,
    ) -> Result<bool, CoreError> {
        let peer = &self.peer_key(peer);
        let slot = self.slot_mut(from, reference)?;
        let displaced = match slot {
            RefSlot::Single(current) => {
                if current.as_ref() == Some(peer) {
                    return Ok(false);
                }
                current.replace(peer.clone())
            }
            RefSlot::Multiple(peers) => {
                if !peers.insert(peer.clone()) {
                    return Ok(false);
                }
                None
            }
        };

        if let Some(old) = displaced {
            self.unlink_back_ref(&old, reference, from);
        }
        self.link_back_ref(peer, reference, from);
        debug!(from = %from, reference, peer = %peer, "ref added");
        Ok(true)
    }

    /// Remove `from -[reference]-> peer` and its back-reference.
    /// Returns `false` when there was no such edge.
    pub(crate) fn delete_ref(
        &mut self,
        from: &ObjectKey,
        reference: &str,
        peer: &ObjectKey,
    ) -> Result<bool, CoreError> {
        let peer = &self.peer_key(peer);
        if !self.require(from)?.refs.get(reference).is_some_and(|s| s.contains(peer)) {
            // Validate the reference name even when there is nothing to do.
            self.slot_ref(from, reference)?;
            return Ok(false);
        }

        match self.slot_mut(from, reference)? {
            RefSlot::Single(current) => *current = None,
            RefSlot::Multiple(peers) => {
                peers.remove(peer);
            }
        }
        self.unlink_back_ref(peer, reference, from);
        debug!(from = %from, reference, peer = %peer, "ref deleted");
        Ok(true)
    }

    /// Bring a single-valued reference to `new`.
    pub(crate) fn update_single_ref(
        &mut self,
        from: &ObjectKey,
        reference: &str,
        new: Option<ObjectKey>,
    ) -> Result<bool, CoreError> {
        let current = match self.slot_ref(from, reference)? {
            RefSlot::Single(current) => current.clone(),
            RefSlot::Multiple(_) => {
                return Err(CoreError::Internal(format!(
                    "{from}.{reference} is multi-valued"
                )));
            }
        };

        let new = new.map(|peer| self.peer_key(&peer));
        if current == new {
            return Ok(false);
        }
        match new {
            Some(peer) => self.add_ref(from, reference, &peer),
            None => current.map_or(Ok(false), |old| self.delete_ref(from, reference, &old)),
        }
    }

    /// Bring a multi-valued reference to exactly `new`.
    pub(crate) fn update_multiple_refs(
        &mut self,
        from: &ObjectKey,
        reference: &str,
        new: &BTreeSet<ObjectKey>,
    ) -> Result<bool, CoreError> {
        let current = match self.slot_ref(from, reference)? {
            RefSlot::Multiple(peers) => peers.clone(),
            RefSlot::Single(_) => {
                return Err(CoreError::Internal(format!(
                    "{from}.{reference} is single-valued"
                )));
            }
        };

        let new: BTreeSet<ObjectKey> = new.iter().map(|peer| self.peer_key(peer)).collect();
        let mut changed = false;
        for stale in current.difference(&new) {
            changed |= self.delete_ref(from, reference, stale)?;
        }
        for fresh in new.difference(&current) {
            changed |= self.add_ref(from, reference, fresh)?;
        }
        Ok(changed)
    }

    // ── Parent / children ────────────────────────────────────────────

    pub(crate) fn set_parent(
        &mut self,
        child: &ObjectKey,
        parent: Option<ObjectKey>,
    ) -> Result<bool, CoreError> {
        let current = self.require(child)?.parent.clone();
        let parent = parent.map(|parent| self.peer_key(&parent));
        if current == parent {
            return Ok(false);
        }
        if let Some(old) = &current {
            self.unlink_child(old, child);
        }
        if let Some(object) = self.object_mut(child) {
            object.parent.clone_from(&parent);
        }
        if let Some(new) = &parent {
            self.link_child(new, child);
        }
        Ok(true)
    }

    // ── Whole-object operations ──────────────────────────────────────

    pub(crate) fn apply(
        &mut self,
        registry: &ResourceRegistry,
        doc: ObjectDocument,
    ) -> Result<ApplyOutcome, CoreError> {
        let schema = registry.require(&doc.key.kind)?;
        if !self.tables.contains_key(&doc.key.kind) {
            return Err(CoreError::UnknownResourceType {
                kind: doc.key.kind.to_string(),
            });
        }

        if let Some(previous) = self.renamed_from(&doc) {
            self.rekey(&previous, &doc.key);
        }

        if self.contains(&doc.key) {
            let changed = self.update(schema, doc)?;
            Ok(ApplyOutcome::Updated { changed })
        } else {
            self.insert(schema, doc)?;
            Ok(ApplyOutcome::Inserted)
        }
    }

    /// Cache key of the object `doc` renames: same store UUID, cached under
    /// a different name. Only name-indexed types can hit this.
    fn renamed_from(&self, doc: &ObjectDocument) -> Option<ObjectKey> {
        if self.contains(&doc.key) {
            return None;
        }
        let uuid = doc.uuid?;
        let previous = self.canonical(&ObjectKey::new(doc.key.kind.clone(), ObjectId::Uuid(uuid)))?;
        (previous != doc.key).then_some(previous)
    }

    /// Move a cached object to a new cache key, carrying every edge that
    /// touches it. Name and payload are left for the following update.
    fn rekey(&mut self, old: &ObjectKey, new: &ObjectKey) {
        let Some(object) = self.get(old).map(Arc::clone) else {
            return;
        };

        for (reference, slot) in &object.refs {
            for peer in slot.targets() {
                self.unlink_back_ref(peer, reference, old);
                self.link_back_ref(peer, reference, new);
            }
        }
        for (reference, referrers) in &object.back_refs {
            for referrer in referrers {
                self.retarget_forward_ref(referrer, reference, old, new);
            }
        }
        if let Some(parent) = &object.parent {
            self.unlink_child(parent, old);
            self.link_child(parent, new);
        }
        for (kind, ids) in &object.children {
            for id in ids {
                if let Some(child) = self.object_mut(&ObjectKey::new(kind.clone(), id.clone())) {
                    child.parent = Some(new.clone());
                }
            }
        }

        if let Some(table) = self.tables.get_mut(&old.kind) {
            if let Some(removed) = table.remove(&old.id) {
                let mut moved = Arc::unwrap_or_clone(removed);
                moved.key = new.clone();
                table.insert(moved);
            }
        }
        debug!(old = %old, new = %new, "object renamed");
    }

    fn insert(&mut self, schema: &ResourceSchema, doc: ObjectDocument) -> Result<(), CoreError> {
        let ObjectDocument {
            key,
            uuid,
            fq_name,
            payload,
            refs,
            parent,
        } = doc;

        let mut object = CachedObject::new(schema, key.clone(), uuid, fq_name, payload);
        if let Some(adopted) = self.pending_back_refs.remove(&key) {
            debug!(key = %key, "adopting dangling back-refs");
            object.back_refs = adopted;
        }
        if let Some(children) = self.pending_children.remove(&key) {
            for child in children {
                object.children.entry(child.kind).or_default().insert(child.id);
            }
        }

        let aliases = alias_keys(&object);
        if let Some(table) = self.tables.get_mut(&key.kind) {
            table.insert(object);
        }
        for alias in aliases {
            self.adopt_alias(&alias, &key);
        }

        for (reference, peers) in refs {
            for peer in &peers {
                self.add_ref(&key, &reference, peer)?;
            }
        }
        self.set_parent(&key, parent)?;
        debug!(key = %key, "object inserted");
        Ok(())
    }

    fn update(&mut self, schema: &ResourceSchema, doc: ObjectDocument) -> Result<bool, CoreError> {
        let ObjectDocument {
            key,
            uuid,
            fq_name,
            payload,
            mut refs,
            parent,
        } = doc;

        let existing = self.require(&key)?;
        let renamed = existing.fq_name != fq_name || existing.uuid != uuid;
        let body_changed = renamed || existing.payload != payload;

        if body_changed {
            let old_name = existing.fq_name.to_string();
            let old_uuid = existing.uuid;
            if let Some(object) = self.object_mut(&key) {
                object.payload = payload;
                object.fq_name = fq_name;
                object.uuid = uuid;
            }
            if renamed {
                if let Some(table) = self.tables.get_mut(&key.kind) {
                    table.reindex(&key.id, &old_name, old_uuid);
                }
            }
        }

        let mut changed = body_changed;
        for spec in schema.refs() {
            let peers = refs.remove(&spec.name).unwrap_or_default();
            changed |= match spec.cardinality {
                Cardinality::Single => {
                    self.update_single_ref(&key, &spec.name, peers.into_iter().next())?
                }
                Cardinality::Multiple => {
                    let peers: BTreeSet<ObjectKey> = peers.into_iter().collect();
                    self.update_multiple_refs(&key, &spec.name, &peers)?
                }
            };
        }
        changed |= self.set_parent(&key, parent)?;

        debug!(key = %key, changed, "object updated");
        Ok(changed)
    }

    /// Remove an object and every edge touching it. Its outgoing refs are
    /// pruned from their peers, referrers lose their forward refs to it,
    /// and its children are parked as dangling.
    pub(crate) fn remove(&mut self, key: &ObjectKey) -> Option<Arc<CachedObject>> {
        let key = self.canonical(key)?;
        let object = Arc::clone(self.get(&key)?);

        for (reference, slot) in &object.refs {
            for peer in slot.targets() {
                self.unlink_back_ref(peer, reference, &key);
            }
        }

        for (reference, referrers) in &object.back_refs {
            for referrer in referrers {
                self.strip_forward_ref(referrer, reference, &key);
            }
        }

        if let Some(parent) = &object.parent {
            self.unlink_child(parent, &key);
        }

        for (kind, ids) in &object.children {
            let parked = self.pending_children.entry(key.clone()).or_default();
            for id in ids {
                parked.insert(ObjectKey::new(kind.clone(), id.clone()));
            }
        }

        let removed = self.tables.get_mut(&key.kind)?.remove(&key.id);
        debug!(key = %key, "object removed");
        removed
    }

    pub(crate) fn clear(&mut self) {
        for table in self.tables.values_mut() {
            table.clear();
        }
        self.pending_back_refs.clear();
        self.pending_children.clear();
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn slot_ref(&self, from: &ObjectKey, reference: &str) -> Result<&RefSlot, CoreError> {
        self.require(from)?
            .refs
            .get(reference)
            .ok_or_else(|| CoreError::UnknownReference {
                kind: from.kind.to_string(),
                reference: reference.to_owned(),
            })
    }

    fn slot_mut(&mut self, from: &ObjectKey, reference: &str) -> Result<&mut RefSlot, CoreError> {
        // Validate first so a missing reference never triggers a copy.
        self.slot_ref(from, reference)?;
        self.object_mut(from)
            .and_then(|object| object.refs.get_mut(reference))
            .ok_or_else(|| CoreError::NotCached { key: from.clone() })
    }

    /// Move dangling edges that named a newly inserted object by another
    /// identity form onto its cache key, rewriting the referrers' side.
    fn adopt_alias(&mut self, alias: &ObjectKey, key: &ObjectKey) {
        if let Some(parked) = self.pending_back_refs.remove(alias) {
            debug!(key = %key, alias = %alias, "adopting dangling back-refs by alias");
            for (reference, referrers) in parked {
                for referrer in referrers {
                    self.retarget_forward_ref(&referrer, &reference, alias, key);
                    self.link_back_ref(key, &reference, &referrer);
                }
            }
        }

        if let Some(children) = self.pending_children.remove(alias) {
            for child in children {
                if let Some(object) = self.object_mut(&child) {
                    object.parent = Some(key.clone());
                }
                self.link_child(key, &child);
            }
        }
    }

    /// Point `referrer`'s `reference` slot at `to` where it held `from`.
    fn retarget_forward_ref(&mut self, referrer: &ObjectKey, reference: &str, from: &ObjectKey, to: &ObjectKey) {
        let Some(slot) = self
            .object_mut(referrer)
            .and_then(|object| object.refs.get_mut(reference))
        else {
            return;
        };
        match slot {
            RefSlot::Single(current) => {
                if current.as_ref() == Some(from) {
                    *current = Some(to.clone());
                }
            }
            RefSlot::Multiple(peers) => {
                if peers.remove(from) {
                    peers.insert(to.clone());
                }
            }
        }
    }

    fn link_back_ref(&mut self, peer: &ObjectKey, reference: &str, referrer: &ObjectKey) {
        if self.contains(peer) {
            if let Some(target) = self.object_mut(peer) {
                target
                    .back_refs
                    .entry(reference.to_owned())
                    .or_default()
                    .insert(referrer.clone());
            }
        } else {
            self.pending_back_refs
                .entry(peer.clone())
                .or_default()
                .entry(reference.to_owned())
                .or_default()
                .insert(referrer.clone());
        }
    }

    fn unlink_back_ref(&mut self, peer: &ObjectKey, reference: &str, referrer: &ObjectKey) {
        if self.contains(peer) {
            let present = self
                .get(peer)
                .is_some_and(|target| target.back_refs.get(reference).is_some_and(|s| s.contains(referrer)));
            if !present {
                return;
            }
            if let Some(target) = self.object_mut(peer) {
                remove_from(&mut target.back_refs, reference, referrer);
            }
        } else if let Some(pending) = self.pending_back_refs.get_mut(peer) {
            remove_from(pending, reference, referrer);
            if pending.is_empty() {
                self.pending_back_refs.remove(peer);
            }
        }
    }

    fn strip_forward_ref(&mut self, referrer: &ObjectKey, reference: &str, target: &ObjectKey) {
        let holds = self
            .get(referrer)
            .and_then(|r| r.refs.get(reference))
            .is_some_and(|slot| slot.contains(target));
        if !holds {
            return;
        }
        if let Some(object) = self.object_mut(referrer) {
            match object.refs.get_mut(reference) {
                Some(RefSlot::Single(current)) => *current = None,
                Some(RefSlot::Multiple(peers)) => {
                    peers.remove(target);
                }
                None => {}
            }
            debug!(referrer = %referrer, reference, target = %target, "stripped ref to removed object");
        }
    }

    fn link_child(&mut self, parent: &ObjectKey, child: &ObjectKey) {
        if self.contains(parent) {
            if let Some(object) = self.object_mut(parent) {
                object
                    .children
                    .entry(child.kind.clone())
                    .or_default()
                    .insert(child.id.clone());
            }
        } else {
            self.pending_children
                .entry(parent.clone())
                .or_default()
                .insert(child.clone());
        }
    }

    fn unlink_child(&mut self, parent: &ObjectKey, child: &ObjectKey) {
        if self.contains(parent) {
            if let Some(object) = self.object_mut(parent) {
                if let Some(ids) = object.children.get_mut(&child.kind) {
                    ids.remove(&child.id);
                    if ids.is_empty() {
                        object.children.remove(&child.kind);
                    }
                }
            }
        } else if let Some(parked) = self.pending_children.get_mut(parent) {
            parked.remove(child);
            if parked.is_empty() {
                self.pending_children.remove(parent);
            }
        }
    }
}

/// Identity forms of `object` other than its cache key.
fn alias_keys(object: &CachedObject) -> Vec<ObjectKey> {
    let key = object.key();
    let mut forms = vec![object.fq_name.as_id()];
    if let Some(uuid) = object.uuid {
        forms.push(ObjectId::Uuid(uuid));
    }
    forms
        .into_iter()
        .filter(|id| *id != key.id)
        .map(|id| ObjectKey::new(key.kind.clone(), id))
        .collect()
}

fn remove_from(map: &mut BackRefs, reference: &str, referrer: &ObjectKey) {
    if let Some(set) = map.get_mut(reference) {
        set.remove(referrer);
        if set.is_empty() {
            map.remove(reference);
        }
    }
}
