// ── Dependency resolution ──
//
// Computes the closure of objects affected by one change: follow every rule
// rooted at the changed object's type, collect live peers, recurse into
// each newly discovered object. Pure in-memory work over a read-locked view.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;
use tracing::trace;

use super::{Edge, ReactionMap};
use crate::graph::GraphView;
use crate::model::{CachedObject, ObjectId, ObjectKey, ResourceType};

// ── DependencySet ───────────────────────────────────────────────────

/// Objects to recompute, grouped by type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DependencySet(BTreeMap<ResourceType, BTreeSet<ObjectId>>);

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the key was not already present.
    pub fn insert(&mut self, key: ObjectKey) -> bool {
        self.0.entry(key.kind).or_default().insert(key.id)
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.0.get(&key.kind).is_some_and(|ids| ids.contains(&key.id))
    }

    pub fn len(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeSet::is_empty)
    }

    pub fn ids(&self, kind: &ResourceType) -> impl Iterator<Item = &ObjectId> {
        self.0.get(kind).into_iter().flatten()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &ResourceType> {
        self.0.keys()
    }

    /// Every member as a full key, ordered by type then identity.
    pub fn iter(&self) -> impl Iterator<Item = ObjectKey> + '_ {
        self.0
            .iter()
            .flat_map(|(kind, ids)| ids.iter().map(move |id| ObjectKey::new(kind.clone(), id.clone())))
    }

    pub fn union(mut self, other: Self) -> Self {
        for (kind, ids) in other.0 {
            self.0.entry(kind).or_default().extend(ids);
        }
        self
    }
}

impl Extend<ObjectKey> for DependencySet {
    fn extend<I: IntoIterator<Item = ObjectKey>>(&mut self, iter: I) {
        for key in iter {
            self.insert(key);
        }
    }
}

impl FromIterator<ObjectKey> for DependencySet {
    fn from_iter<I: IntoIterator<Item = ObjectKey>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

// ── Resolver ────────────────────────────────────────────────────────

/// Which rules apply to the changed object itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Every rule rooted at the object's type.
    Full,
    /// Only outbound rules (`downstream`, `parent`) at the root; discovered
    /// objects are still expanded through every rule. Used for CREATE,
    /// where nothing can reference the new object yet.
    DownstreamRoot,
}

/// Walks the graph along a [`ReactionMap`].
#[derive(Debug, Clone, Copy)]
pub struct DependencyResolver<'m> {
    map: &'m ReactionMap,
}

impl<'m> DependencyResolver<'m> {
    pub fn new(map: &'m ReactionMap) -> Self {
        Self { map }
    }

    /// Closure of objects affected by a change to `root`.
    ///
    /// Every object appears at most once and the root never appears in its
    /// own set. Peers that are not cached prune their branch silently.
    pub fn evaluate(&self, view: &GraphView<'_>, root: &ObjectKey, scope: Scope) -> DependencySet {
        let mut deps = DependencySet::new();
        let Some(root_key) = view.canonical(root) else {
            return deps;
        };

        let mut visited: BTreeSet<ObjectKey> = BTreeSet::new();
        visited.insert(root_key.clone());
        let mut queue: VecDeque<(ObjectKey, bool)> = VecDeque::new();
        queue.push_back((root_key, true));

        while let Some((current, is_root)) = queue.pop_front() {
            let Some(object) = view.get(&current) else {
                continue;
            };

            for rule in self.map.rules_for(object.kind()) {
                if is_root && scope == Scope::DownstreamRoot && !rule.edge.is_outbound() {
                    continue;
                }
                for peer in neighbours(object, &rule.edge, &rule.target) {
                    let Some(peer) = view.canonical(&peer) else {
                        trace!(from = %current, to = %peer, "resolve: peer not cached, pruned");
                        continue;
                    };
                    if visited.insert(peer.clone()) {
                        deps.insert(peer.clone());
                        queue.push_back((peer, false));
                    }
                }
            }
        }

        deps
    }
}

/// Peers of `object` of type `target` along `edge`.
fn neighbours(object: &CachedObject, edge: &Edge, target: &ResourceType) -> Vec<ObjectKey> {
    match edge {
        Edge::Forward(reference) => object.ref_targets(reference).cloned().collect(),
        Edge::Backward(reference) => object
            .referrers(reference)
            .filter(|referrer| &referrer.kind == target)
            .cloned()
            .collect(),
        Edge::Parent => object
            .parent()
            .filter(|parent| &parent.kind == target)
            .cloned()
            .into_iter()
            .collect(),
        Edge::Children => object.children_of(target).collect(),
    }
}
