use std::collections::HashSet;
use std::fmt;

use crate::error::{HermsError, Result};
use crate::logic::grammar::PathHop;
use crate::model::{DataType, NodeId, NodeTypeId, PropertyRef, Repository, Value};

/// How a hop finds its property on a concrete node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HopBinding {
    /// Exactly one property matched across every candidate type.
    Static(PropertyRef),
    /// Several types declare a property of this name; pick per node type.
    /// Keyed by the type the hop starts from (`None`: any node, for reverse
    /// hops over untyped node properties).
    PerType(Vec<(Option<NodeTypeId>, PropertyRef)>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub reverse: bool,
    pub name: String,
    pub binding: HopBinding,
}

/// A resolved property path.
#[derive(Debug, Clone, PartialEq)]
pub struct Props {
    pub hops: Vec<Hop>,
    value_type: Option<DataType>,
}

struct Candidate {
    from: Option<NodeTypeId>,
    prop: PropertyRef,
    to: DataType,
}

impl Props {
    /// Resolve `path` against the schema. Every hop but the last must be
    /// node-valued; with `require_node` the last one too. The candidate types
    /// narrow hop by hop; a hop with no candidate is a query format error.
    pub fn resolve(path: &[PathHop], repo: &Repository, require_node: bool) -> Result<Props> {
        if path.is_empty() {
            return Err(HermsError::query("empty property path"));
        }
        // None: any node type
        let mut context: Option<HashSet<NodeTypeId>> = None;
        let mut hops = Vec::with_capacity(path.len());
        let mut last_targets = Vec::new();

        for (i, step) in path.iter().enumerate() {
            let need_node = require_node || i + 1 < path.len();
            let mut candidates = Vec::new();
            for ty in repo.types() {
                let Some(prop) = ty.property(&step.name) else {
                    continue;
                };
                if need_node && !prop.is_node() {
                    continue;
                }
                let candidate = if step.reverse {
                    let from = match prop.data_type {
                        DataType::Node(target) => target,
                        _ => continue,
                    };
                    Candidate {
                        from,
                        prop: prop.reference(),
                        to: DataType::Node(Some(prop.owner)),
                    }
                } else {
                    Candidate {
                        from: Some(prop.owner),
                        prop: prop.reference(),
                        to: prop.data_type.clone(),
                    }
                };
                if let Some(types) = &context {
                    let reachable = match (step.reverse, candidate.from) {
                        // the node must be able to carry the property
                        (false, Some(owner)) => types.iter().any(|t| repo.is_subtype(*t, owner)),
                        // the node must be an acceptable target of the property
                        (true, Some(target)) => types.iter().any(|t| repo.is_subtype(*t, target)),
                        (_, None) => true,
                    };
                    if !reachable {
                        continue;
                    }
                }
                candidates.push(candidate);
            }

            if candidates.is_empty() {
                return Err(HermsError::query(format!(
                    "{}: property not found or type mismatch",
                    step
                )));
            }

            context = if candidates.iter().any(|c| c.to == DataType::Node(None)) {
                None
            } else {
                let mut next = HashSet::new();
                for c in &candidates {
                    if let DataType::Node(Some(t)) = c.to {
                        next.extend(repo.subtypes_of(t));
                    }
                }
                Some(next)
            };

            let binding = if candidates.len() == 1 {
                HopBinding::Static(candidates[0].prop)
            } else {
                HopBinding::PerType(candidates.iter().map(|c| (c.from, c.prop)).collect())
            };
            last_targets = candidates.into_iter().map(|c| c.to).collect();
            hops.push(Hop {
                reverse: step.reverse,
                name: step.name.clone(),
                binding,
            });
        }

        Ok(Props {
            hops,
            value_type: shared_type(&last_targets),
        })
    }

    /// Type of the values the path yields: the shared type, a generic
    /// node/tag type when every branch is node/tag-valued, otherwise `None`
    /// (known only per node at evaluation time).
    pub fn value_type(&self) -> Option<&DataType> {
        self.value_type.as_ref()
    }

    /// Properties a hop reads on a node of type `ty`.
    fn properties_for(&self, repo: &Repository, hop: &Hop, ty: NodeTypeId) -> Vec<PropertyRef> {
        match &hop.binding {
            HopBinding::Static(prop) => {
                if hop.reverse || repo.is_subtype(ty, prop.owner) {
                    vec![*prop]
                } else {
                    Vec::new()
                }
            }
            HopBinding::PerType(candidates) if hop.reverse => candidates
                .iter()
                .filter(|(target, _)| target.map_or(true, |t| repo.is_subtype(ty, t)))
                .map(|(_, prop)| *prop)
                .collect(),
            HopBinding::PerType(candidates) => {
                // most derived declaration wins
                repo.ancestors(ty)
                    .into_iter()
                    .find_map(|a| {
                        candidates
                            .iter()
                            .find(|(owner, _)| *owner == Some(a))
                            .map(|(_, prop)| *prop)
                    })
                    .into_iter()
                    .collect()
            }
        }
    }

    /// Values reached from `node`, each paired with its declared type.
    /// Multi-hop paths flatten each hop's output into the next hop's input.
    pub fn typed_values(&self, repo: &Repository, node: NodeId) -> Vec<(Value, DataType)> {
        let mut current = vec![node];
        let mut out = Vec::new();
        for (i, hop) in self.hops.iter().enumerate() {
            let last = i + 1 == self.hops.len();
            out.clear();
            for id in &current {
                let Some(n) = repo.get_node(*id) else {
                    continue;
                };
                for prop in self.properties_for(repo, hop, n.node_type) {
                    if hop.reverse {
                        let declared = DataType::Node(Some(prop.owner));
                        out.extend(n.referrers(prop).map(|r| (Value::Node(r), declared.clone())));
                    } else if let Some(value) = n.prop(prop) {
                        let declared = repo
                            .property(prop)
                            .map(|p| p.data_type.clone())
                            .unwrap_or(DataType::Any);
                        out.extend(value.items().into_iter().map(|v| (v.clone(), declared.clone())));
                    }
                }
            }
            if !last {
                let mut seen = HashSet::new();
                current = out
                    .iter()
                    .filter_map(|(v, _)| v.as_node())
                    .filter(|id| seen.insert(*id))
                    .collect();
            }
        }
        out
    }

    /// Nodes reached from `node`.
    pub fn nodes(&self, repo: &Repository, node: NodeId) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.typed_values(repo, node)
            .into_iter()
            .filter_map(|(v, _)| v.as_node())
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

fn shared_type(types: &[DataType]) -> Option<DataType> {
    let first = types.first()?;
    if types.iter().all(|t| t == first) {
        Some(first.clone())
    } else if types.iter().all(DataType::is_node) {
        Some(DataType::Node(None))
    } else if types.iter().all(DataType::is_tag) {
        Some(DataType::Tag(None))
    } else {
        None
    }
}

impl fmt::Display for Props {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, hop) in self.hops.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            if hop.reverse {
                write!(f, "~")?;
            }
            write!(f, "{}", hop.name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Primitive, RepositoryConfig};
    use serde_json::json;

    fn repo() -> Repository {
        let cfg: RepositoryConfig = serde_json::from_value(json!({
            "tags": {"tagcat": {"children": ["t1", "t2"]}, "tag1": ""},
            "types": {
                "type1": {"properties": {
                    "foo": "type2",
                    "bar": {"type": "type3", "list": true},
                    "val": "int"
                }},
                "type2": {"properties": {"num": "int", "text": {"type": "string", "list": true}}},
                "type3": {"properties": {"val": "string", "tag": "tag", "tagcat": "tagcat"}},
                "type4": {"properties": {"foo": "node"}}
            },
            "nodes": {
                "type2": {"n21": {"properties": {"num": 10, "text": ["a", "b"]}}},
                "type3": {"n31": {"properties": {"tag": "tag1"}}},
                "type1": {
                    "n11": {"properties": {"foo": "n21", "bar": ["n31"], "val": 4}},
                    "n12": {"properties": {"foo": "n21"}}
                },
                "type4": {"n41": {"properties": {"foo": "type3:n31"}}}
            }
        }))
        .unwrap();
        let mut repo = Repository::new();
        repo.configure(&cfg).unwrap();
        repo
    }

    fn path(text: &str) -> Vec<PathHop> {
        text.split('.')
            .map(|h| PathHop {
                reverse: h.starts_with('~'),
                name: h.trim_start_matches('~').to_string(),
            })
            .collect()
    }

    #[test]
    fn test_static_multi_hop() {
        let repo = repo();
        let props = Props::resolve(&path("foo.num"), &repo, false).unwrap();
        assert!(matches!(props.hops[1].binding, HopBinding::Static(_)));
        assert_eq!(
            props.value_type(),
            Some(&DataType::Primitive(Primitive::Integer))
        );
        let n11 = repo.node_or_error("n11", None).unwrap();
        let values: Vec<Value> = props
            .typed_values(&repo, n11)
            .into_iter()
            .map(|(v, _)| v)
            .collect();
        assert_eq!(values, vec![Value::Integer(10)]);
    }

    #[test]
    fn test_ambiguous_hop_is_per_type() {
        let repo = repo();
        let val = Props::resolve(&path("val"), &repo, false).unwrap();
        assert!(matches!(val.hops[0].binding, HopBinding::PerType(_)));
        // int and string disagree
        assert_eq!(val.value_type(), None);

        let foo = Props::resolve(&path("foo"), &repo, false).unwrap();
        assert_eq!(foo.value_type(), Some(&DataType::Node(None)));
        let n41 = repo.node_or_error("n41", None).unwrap();
        let n31 = repo.node_or_error("n31", None).unwrap();
        assert_eq!(foo.nodes(&repo, n41), vec![n31]);
    }

    #[test]
    fn test_context_narrows_candidates() {
        let repo = repo();
        // after bar only type3 is in play, so val is the string property
        let props = Props::resolve(&path("bar.val"), &repo, false).unwrap();
        assert!(matches!(props.hops[1].binding, HopBinding::Static(_)));
        assert_eq!(
            props.value_type(),
            Some(&DataType::Primitive(Primitive::String))
        );
        assert!(Props::resolve(&path("bar.num"), &repo, false).is_err());
        // type4.foo points at any node, so anything may follow it
        assert!(Props::resolve(&path("foo.tag"), &repo, false).is_ok());
        assert!(Props::resolve(&path("val.num"), &repo, false).is_err());
        assert!(Props::resolve(&path("nothere"), &repo, false).is_err());
    }

    #[test]
    fn test_reverse_hop() {
        let repo = repo();
        let props = Props::resolve(&path("~foo"), &repo, false).unwrap();
        let n21 = repo.node_or_error("n21", None).unwrap();
        let n11 = repo.node_or_error("n11", None).unwrap();
        let n12 = repo.node_or_error("n12", None).unwrap();
        assert_eq!(props.nodes(&repo, n21), vec![n11, n12]);

        let n31 = repo.node_or_error("n31", None).unwrap();
        let n41 = repo.node_or_error("n41", None).unwrap();
        // type4.foo accepts any node, so it reaches n31 too
        assert_eq!(props.nodes(&repo, n31), vec![n41]);

        let back = Props::resolve(&path("~foo.val"), &repo, false).unwrap();
        let values: Vec<Value> = back
            .typed_values(&repo, n21)
            .into_iter()
            .map(|(v, _)| v)
            .collect();
        assert_eq!(values, vec![Value::Integer(4)]);
    }

    #[test]
    fn test_apply_requires_node_valued_last_hop() {
        let repo = repo();
        assert!(Props::resolve(&path("foo.num"), &repo, true).is_err());
        assert!(Props::resolve(&path("bar"), &repo, true).is_ok());
    }
}
