// ── Cached object ──
//
// The in-memory mirror of one configuration object. Reference state is
// mutated only by the graph's edge primitives; everything here is read-only
// from outside the crate.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::identity::{FqName, ObjectId, ObjectKey, ResourceType};
use crate::registry::{Cardinality, ResourceSchema};

// ── RefSlot ─────────────────────────────────────────────────────────

/// Forward-reference state for one reference name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RefSlot {
    Single(Option<ObjectKey>),
    Multiple(BTreeSet<ObjectKey>),
}

impl RefSlot {
    pub(crate) fn empty(cardinality: Cardinality) -> Self {
        match cardinality {
            Cardinality::Single => Self::Single(None),
            Cardinality::Multiple => Self::Multiple(BTreeSet::new()),
        }
    }

    /// Every peer currently referenced through this slot.
    pub fn targets(&self) -> impl Iterator<Item = &ObjectKey> {
        let (single, multiple) = match self {
            Self::Single(peer) => (peer.as_ref(), None),
            Self::Multiple(peers) => (None, Some(peers)),
        };
        single.into_iter().chain(multiple.into_iter().flatten())
    }

    pub fn contains(&self, peer: &ObjectKey) -> bool {
        match self {
            Self::Single(current) => current.as_ref() == Some(peer),
            Self::Multiple(peers) => peers.contains(peer),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Single(current) => current.is_none(),
            Self::Multiple(peers) => peers.is_empty(),
        }
    }

    pub fn cardinality(&self) -> Cardinality {
        match self {
            Self::Single(_) => Cardinality::Single,
            Self::Multiple(_) => Cardinality::Multiple,
        }
    }
}

// ── CachedObject ────────────────────────────────────────────────────

/// One cached configuration object with its reference bookkeeping.
///
/// Forward references live in `refs`, keyed by reference name. The reverse
/// edges (`back_refs`) are keyed by the *referrer's* reference name and
/// hold the referrer's full key, so two types that both use a reference
/// called `route_target` stay distinguishable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedObject {
    pub(crate) key: ObjectKey,
    pub(crate) uuid: Option<Uuid>,
    pub(crate) fq_name: FqName,
    pub(crate) payload: Value,
    pub(crate) refs: BTreeMap<String, RefSlot>,
    pub(crate) back_refs: BTreeMap<String, BTreeSet<ObjectKey>>,
    pub(crate) parent: Option<ObjectKey>,
    pub(crate) children: BTreeMap<ResourceType, BTreeSet<ObjectId>>,
}

impl CachedObject {
    /// A fresh object with one empty slot per reference the schema declares.
    pub(crate) fn new(
        schema: &ResourceSchema,
        key: ObjectKey,
        uuid: Option<Uuid>,
        fq_name: FqName,
        payload: Value,
    ) -> Self {
        let refs = schema
            .refs()
            .iter()
            .map(|spec| (spec.name.clone(), RefSlot::empty(spec.cardinality)))
            .collect();

        Self {
            key,
            uuid,
            fq_name,
            payload,
            refs,
            back_refs: BTreeMap::new(),
            parent: None,
            children: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn kind(&self) -> &ResourceType {
        &self.key.kind
    }

    pub fn id(&self) -> &ObjectId {
        &self.key.id
    }

    /// Store-assigned UUID, also for name-indexed objects.
    pub fn uuid(&self) -> Option<&Uuid> {
        self.uuid.as_ref()
    }

    pub fn fq_name(&self) -> &FqName {
        &self.fq_name
    }

    /// Opaque object body as last read from the store.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn refs(&self) -> &BTreeMap<String, RefSlot> {
        &self.refs
    }

    pub fn ref_slot(&self, reference: &str) -> Option<&RefSlot> {
        self.refs.get(reference)
    }

    /// Peers referenced through `reference`; empty for unknown names.
    pub fn ref_targets<'a>(&'a self, reference: &str) -> impl Iterator<Item = &'a ObjectKey> + 'a {
        self.refs
            .get(reference)
            .into_iter()
            .flat_map(RefSlot::targets)
    }

    pub fn back_refs(&self) -> &BTreeMap<String, BTreeSet<ObjectKey>> {
        &self.back_refs
    }

    /// Referrers holding this object through `reference`.
    pub fn referrers<'a>(&'a self, reference: &str) -> impl Iterator<Item = &'a ObjectKey> + 'a {
        self.back_refs.get(reference).into_iter().flatten()
    }

    pub fn parent(&self) -> Option<&ObjectKey> {
        self.parent.as_ref()
    }

    pub fn children(&self) -> &BTreeMap<ResourceType, BTreeSet<ObjectId>> {
        &self.children
    }

    pub fn children_of<'a>(&'a self, kind: &'a ResourceType) -> impl Iterator<Item = ObjectKey> + 'a {
        self.children
            .get(kind)
            .into_iter()
            .flatten()
            .map(move |id| ObjectKey::new(kind.clone(), id.clone()))
    }
}
