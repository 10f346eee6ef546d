// ── Symmetry audit ──
//
// Walks the whole graph and reports every edge whose two halves disagree.
// An empty report means every forward ref has its back-ref (or a parked
// dangling back-ref), every back-ref has its forward ref, and the same for
// parent/children.

use std::fmt;

use serde::Serialize;
use strum::Display;

use super::state::GraphState;
use crate::model::ObjectKey;

/// What is wrong with one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ViolationKind {
    /// Forward ref without the matching back-ref.
    MissingBackRef,
    /// Back-ref without the matching forward ref.
    MissingForwardRef,
    /// Dangling back-ref parked for an object that is cached.
    UnadoptedBackRef,
    /// Child pointing at a parent that does not list it.
    MissingChild,
    /// Parent listing a child that does not point back.
    MissingParent,
}

/// One asymmetric edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymmetryViolation {
    pub from: ObjectKey,
    pub edge: String,
    pub to: ObjectKey,
    pub kind: ViolationKind,
}

impl fmt::Display for SymmetryViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}: {}", self.from, self.edge, self.to, self.kind)
    }
}

pub(crate) fn audit(state: &GraphState) -> Vec<SymmetryViolation> {
    let mut violations = Vec::new();
    let mut report = |from: &ObjectKey, edge: &str, to: &ObjectKey, kind: ViolationKind| {
        violations.push(SymmetryViolation {
            from: from.clone(),
            edge: edge.to_owned(),
            to: to.clone(),
            kind,
        });
    };

    for table in state.tables.values() {
        for object in table.values() {
            let from = object.key();

            // Forward refs -> back-refs (cached or parked).
            for (reference, slot) in object.refs() {
                for peer in slot.targets() {
                    let mirrored = match state.get(peer) {
                        Some(target) => target.referrers(reference).any(|r| r == from),
                        None => state
                            .pending_back_refs
                            .get(peer)
                            .and_then(|refs| refs.get(reference))
                            .is_some_and(|set| set.contains(from)),
                    };
                    if !mirrored {
                        report(from, reference.as_str(), peer, ViolationKind::MissingBackRef);
                    }
                }
            }

            // Back-refs -> forward refs.
            for (reference, referrers) in object.back_refs() {
                for referrer in referrers {
                    let mirrored = state
                        .get(referrer)
                        .is_some_and(|r| r.ref_targets(reference).any(|t| t == from));
                    if !mirrored {
                        report(referrer, reference.as_str(), from, ViolationKind::MissingForwardRef);
                    }
                }
            }

            // Parent -> children.
            if let Some(parent) = object.parent() {
                let listed = match state.get(parent) {
                    Some(p) => p
                        .children()
                        .get(&from.kind)
                        .is_some_and(|ids| ids.contains(&from.id)),
                    None => state
                        .pending_children
                        .get(parent)
                        .is_some_and(|set| set.contains(from)),
                };
                if !listed {
                    report(from, "parent", parent, ViolationKind::MissingChild);
                }
            }

            // Children -> parent.
            for (kind, ids) in object.children() {
                for id in ids {
                    let child = ObjectKey::new(kind.clone(), id.clone());
                    let points_back = state
                        .get(&child)
                        .is_some_and(|c| c.parent() == Some(from));
                    if !points_back {
                        report(from, "children", &child, ViolationKind::MissingParent);
                    }
                }
            }
        }
    }

    // Parked back-refs must belong to uncached targets and real forward refs.
    for (target, refs) in &state.pending_back_refs {
        for (reference, referrers) in refs {
            for referrer in referrers {
                if state.get(target).is_some() {
                    report(referrer, reference.as_str(), target, ViolationKind::UnadoptedBackRef);
                    continue;
                }
                let mirrored = state
                    .get(referrer)
                    .is_some_and(|r| r.ref_targets(reference).any(|t| t == target));
                if !mirrored {
                    report(referrer, reference.as_str(), target, ViolationKind::MissingForwardRef);
                }
            }
        }
    }

    violations
}
