use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::{BTreeSet, HashMap};

use crate::model::{NodeId, NodeTypeId, PropertyRef, StateId, TagId, Value};

/// An entity of the graph.
///
/// Node handles are the identity of a node. Names are unique within a node
/// type only; two nodes of different types may share a name.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub id: NodeId,
    /// Fixed at creation.
    pub node_type: NodeTypeId,
    pub state: Option<StateId>,
    pub description: String,
    /// Forward property values. Node-valued entries hold `Value::Node` or a
    /// list of them.
    pub properties: HashMap<PropertyRef, Value>,
    /// Nodes referring to this one through a node-valued property. Always the
    /// inverse of the other nodes' forward values.
    pub properties_rev: HashMap<PropertyRef, BTreeSet<NodeId>>,
    /// Flat tag list: explicit tags plus the values of tag-valued properties.
    pub tags: Vec<TagId>,
    /// Per-service configuration keyed by service name.
    pub service_configs: HashMap<String, Json>,
}

impl Node {
    pub fn new(id: NodeId, node_type: NodeTypeId, name: &str) -> Self {
        Self {
            name: name.to_string(),
            id,
            node_type,
            state: None,
            description: String::new(),
            properties: HashMap::new(),
            properties_rev: HashMap::new(),
            tags: Vec::new(),
            service_configs: HashMap::new(),
        }
    }

    pub fn prop(&self, prop: PropertyRef) -> Option<&Value> {
        self.properties.get(&prop)
    }

    /// Nodes pointing at this one through `prop`, in creation order.
    pub fn referrers(&self, prop: PropertyRef) -> impl Iterator<Item = NodeId> + '_ {
        self.properties_rev
            .get(&prop)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    pub fn has_tag(&self, tag: TagId) -> bool {
        self.tags.contains(&tag)
    }
}

/// Configuration of a single node, and the shape `dump_node` produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Json>,
    #[serde(default)]
    pub services: Map<String, Json>,
    #[serde(default)]
    pub tags: Vec<String>,
}
