// ── Reaction map ──
//
// Declarative table of "when an object of type S changes, objects of type
// T reachable through edge E may need recomputation". Built once at startup
// from configuration and validated against the resource registry, so a
// rule naming an unknown type or reference never reaches the resolver.

mod resolver;

pub use resolver::{DependencyResolver, DependencySet, Scope};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::CoreError;
use crate::model::ResourceType;
use crate::registry::ResourceRegistry;

/// Which edge of the changed object a rule follows.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Direction {
    /// Objects the source references.
    Downstream,
    /// Objects referencing the source.
    Upstream,
    /// The source's parent.
    Parent,
    /// The source's children.
    Children,
}

/// One declared reaction, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRule {
    pub source: ResourceType,
    pub target: ResourceType,
    /// Reference name for `downstream`/`upstream`. May be omitted when
    /// exactly one reference connects the two types.
    #[serde(default)]
    pub reference: Option<String>,
    pub direction: Direction,
}

impl ReactionRule {
    pub fn downstream(
        source: impl Into<ResourceType>,
        target: impl Into<ResourceType>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            reference: Some(reference.into()),
            direction: Direction::Downstream,
        }
    }

    pub fn upstream(
        source: impl Into<ResourceType>,
        target: impl Into<ResourceType>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            reference: Some(reference.into()),
            direction: Direction::Upstream,
        }
    }

    pub fn parent(source: impl Into<ResourceType>, target: impl Into<ResourceType>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            reference: None,
            direction: Direction::Parent,
        }
    }

    pub fn children(source: impl Into<ResourceType>, target: impl Into<ResourceType>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            reference: None,
            direction: Direction::Children,
        }
    }
}

/// Concrete edge a validated rule follows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "edge", content = "reference", rename_all = "snake_case")]
pub enum Edge {
    /// `source.refs[name]`
    Forward(String),
    /// `source.back_refs[name]`
    Backward(String),
    Parent,
    Children,
}

impl Edge {
    /// Edges that point away from the changed object (its own refs and
    /// its parent).
    pub fn is_outbound(&self) -> bool {
        matches!(self, Self::Forward(_) | Self::Parent)
    }
}

/// A rule after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledRule {
    pub source: ResourceType,
    pub target: ResourceType,
    pub edge: Edge,
}

/// The validated, indexed set of reaction rules. May be cyclic.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReactionMap {
    rules: BTreeMap<ResourceType, Vec<CompiledRule>>,
}

impl ReactionMap {
    pub fn build(
        rules: impl IntoIterator<Item = ReactionRule>,
        registry: &ResourceRegistry,
    ) -> Result<Self, CoreError> {
        let mut map: BTreeMap<ResourceType, Vec<CompiledRule>> = BTreeMap::new();

        for rule in rules {
            let compiled = compile(&rule, registry)?;
            let entry = map.entry(rule.source.clone()).or_default();
            if !entry.contains(&compiled) {
                entry.push(compiled);
            }
        }

        Ok(Self { rules: map })
    }

    /// Rules rooted at `kind`, in declaration order.
    pub fn rules_for(&self, kind: &ResourceType) -> &[CompiledRule] {
        self.rules.get(kind).map_or(&[], Vec::as_slice)
    }

    pub fn rules(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile(rule: &ReactionRule, registry: &ResourceRegistry) -> Result<CompiledRule, CoreError> {
    let source = registry.require(&rule.source)?;
    let target = registry.require(&rule.target)?;
    let invalid = |message: String| CoreError::Registration {
        message: format!(
            "reaction {} -> {} ({}): {message}",
            rule.source, rule.target, rule.direction
        ),
    };

    let edge = match rule.direction {
        Direction::Downstream => {
            // source.refs[name] points at target
            let candidates: Vec<&str> = source
                .refs()
                .iter()
                .filter(|spec| spec.target == rule.target)
                .map(|spec| spec.name.as_str())
                .collect();
            Edge::Forward(pick_reference(rule, &candidates).map_err(invalid)?)
        }
        Direction::Upstream => {
            // target.refs[name] points at source
            let candidates: Vec<&str> = target
                .refs()
                .iter()
                .filter(|spec| spec.target == rule.source)
                .map(|spec| spec.name.as_str())
                .collect();
            Edge::Backward(pick_reference(rule, &candidates).map_err(invalid)?)
        }
        Direction::Parent => {
            if source.parent_type() != Some(&rule.target) {
                return Err(invalid(format!("{} is not the parent type", rule.target)));
            }
            Edge::Parent
        }
        Direction::Children => {
            if target.parent_type() != Some(&rule.source) {
                return Err(invalid(format!("{} is not a child type", rule.target)));
            }
            Edge::Children
        }
    };

    Ok(CompiledRule {
        source: rule.source.clone(),
        target: rule.target.clone(),
        edge,
    })
}

fn pick_reference(rule: &ReactionRule, candidates: &[&str]) -> Result<String, String> {
    match (&rule.reference, candidates) {
        (Some(name), _) if candidates.contains(&name.as_str()) => Ok(name.clone()),
        (Some(name), _) => Err(format!("no reference named {name} connects these types")),
        (None, [only]) => Ok((*only).to_owned()),
        (None, []) => Err("no reference connects these types".into()),
        (None, _) => Err(format!(
            "ambiguous, name one of: {}",
            candidates.join(", ")
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::gateway::{MemoryStore, StoreGateway};
    use crate::registry::ResourceSchema;

    fn registry() -> ResourceRegistry {
        let gateway: Arc<dyn StoreGateway> = Arc::new(MemoryStore::new());
        ResourceRegistry::builder()
            .register_all(
                [
                    ResourceSchema::new("project"),
                    ResourceSchema::new("route_target"),
                    ResourceSchema::new("virtual_network")
                        .parent("project")
                        .multi_ref("route_target", "route_target")
                        .multi_ref("import_route_target", "route_target"),
                    ResourceSchema::new("routing_instance")
                        .parent("virtual_network")
                        .multi_ref("route_target", "route_target"),
                ],
                &gateway,
            )
            .build()
            .unwrap()
    }

    #[test]
    fn compiles_every_direction() {
        let map = ReactionMap::build(
            [
                ReactionRule::downstream("routing_instance", "route_target", "route_target"),
                ReactionRule::upstream("route_target", "virtual_network", "import_route_target"),
                ReactionRule::parent("routing_instance", "virtual_network"),
                ReactionRule::children("virtual_network", "routing_instance"),
            ],
            &registry(),
        )
        .unwrap();

        assert_eq!(map.len(), 4);
        assert_eq!(
            map.rules_for(&"routing_instance".into())[0].edge,
            Edge::Forward("route_target".into())
        );
        assert_eq!(
            map.rules_for(&"route_target".into())[0].edge,
            Edge::Backward("import_route_target".into())
        );
        assert!(map.rules_for(&"project".into()).is_empty());
    }

    #[test]
    fn reference_can_be_inferred_when_unique() {
        let rule = ReactionRule {
            source: "routing_instance".into(),
            target: "route_target".into(),
            reference: None,
            direction: Direction::Downstream,
        };
        let map = ReactionMap::build([rule], &registry()).unwrap();
        assert_eq!(
            map.rules_for(&"routing_instance".into())[0].edge,
            Edge::Forward("route_target".into())
        );
    }

    #[test]
    fn ambiguous_reference_is_rejected() {
        let rule = ReactionRule {
            source: "virtual_network".into(),
            target: "route_target".into(),
            reference: None,
            direction: Direction::Downstream,
        };
        let err = ReactionMap::build([rule], &registry()).unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = ReactionMap::build(
            [ReactionRule::downstream("bgp_router", "route_target", "route_target")],
            &registry(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::UnknownResourceType { .. }));
    }

    #[test]
    fn wrong_parent_is_rejected() {
        let err = ReactionMap::build(
            [ReactionRule::parent("routing_instance", "project")],
            &registry(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Registration { .. }));
    }

    #[test]
    fn duplicate_rules_collapse() {
        let map = ReactionMap::build(
            [
                ReactionRule::parent("routing_instance", "virtual_network"),
                ReactionRule::parent("routing_instance", "virtual_network"),
            ],
            &registry(),
        )
        .unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn direction_parses_from_config_strings() {
        assert_eq!("upstream".parse::<Direction>().unwrap(), Direction::Upstream);
        assert_eq!(Direction::Children.to_string(), "children");
    }
}
