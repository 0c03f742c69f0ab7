use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeMap;

use crate::model::{DataType, NodeTypeId, Owned, OwnedMap, PropertyRef};

/// A property declared by a node type.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    /// Declaring node type.
    pub owner: NodeTypeId,
    /// Position in the declaring type's property list.
    pub slot: usize,
    pub data_type: DataType,
    pub required: bool,
    /// Ordered sequence instead of a single value.
    pub list: bool,
    /// Default in encoded (configuration) form.
    pub default: Option<Json>,
    pub description: String,
}

impl Property {
    pub fn new(data_type: DataType) -> Self {
        Self {
            name: String::new(),
            owner: NodeTypeId(0),
            slot: 0,
            data_type,
            required: false,
            list: false,
            default: None,
            description: String::new(),
        }
    }

    pub fn is_node(&self) -> bool {
        self.data_type.is_node()
    }

    pub fn is_tag(&self) -> bool {
        self.data_type.is_tag()
    }

    pub fn reference(&self) -> PropertyRef {
        PropertyRef {
            owner: self.owner,
            slot: self.slot,
        }
    }

    /// JSON schema of the encoded value.
    pub fn schema(&self) -> Json {
        let item = self.data_type.schema();
        if self.list {
            json!({ "type": "array", "items": item })
        } else {
            item
        }
    }
}

impl Owned for Property {
    type Owner = NodeTypeId;

    fn assign(&mut self, owner: NodeTypeId, name: &str, slot: usize) {
        self.owner = owner;
        self.name = name.to_string();
        self.slot = slot;
    }
}

/// Schema of a kind of node: an optional base type plus property declarations.
#[derive(Debug, Clone)]
pub struct NodeType {
    pub name: String,
    pub id: NodeTypeId,
    pub base: Option<NodeTypeId>,
    /// Properties declared directly on this type. Inherited ones live on the
    /// base types.
    pub properties: OwnedMap<Property>,
    pub description: String,
}

impl NodeType {
    pub fn new(id: NodeTypeId) -> Self {
        Self {
            name: String::new(),
            id,
            base: None,
            properties: OwnedMap::new(id),
            description: String::new(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }
}

impl Owned for NodeType {
    type Owner = ();

    fn assign(&mut self, _: (), name: &str, slot: usize) {
        self.name = name.to_string();
        self.id = NodeTypeId(slot);
    }
}

/// Property declaration as written in configuration: either a bare type name
/// or the full form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyConfig {
    Short(String),
    Full {
        #[serde(rename = "type", default = "default_type_name")]
        type_name: String,
        #[serde(default)]
        required: bool,
        #[serde(default)]
        list: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Json>,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        description: String,
    },
}

fn default_type_name() -> String {
    "any".to_string()
}

impl PropertyConfig {
    pub fn type_name(&self) -> &str {
        match self {
            PropertyConfig::Short(name) => name,
            PropertyConfig::Full { type_name, .. } => type_name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeTypeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Declaration order is kept; `serde_json` is built with `preserve_order`.
    #[serde(default)]
    pub properties: Map<String, Json>,
}

impl NodeTypeConfig {
    /// Parsed property declarations in declaration order.
    pub fn property_configs(&self) -> serde_json::Result<Vec<(String, PropertyConfig)>> {
        self.properties
            .iter()
            .map(|(name, raw)| {
                serde_json::from_value::<PropertyConfig>(raw.clone()).map(|cfg| (name.clone(), cfg))
            })
            .collect()
    }
}

/// Build the configuration schema of a node whose visible properties are
/// `properties`, given the per-service node schemas.
pub fn node_config_schema<'a>(
    properties: impl IntoIterator<Item = &'a Property>,
    services: BTreeMap<String, Json>,
) -> Json {
    let mut props = Map::new();
    let mut required = Vec::new();
    for prop in properties {
        props.insert(prop.name.clone(), prop.schema());
        if prop.required {
            required.push(Json::String(prop.name.clone()));
        }
    }
    json!({
        "type": "object",
        "properties": {
            "properties": { "type": "object", "properties": props, "required": required },
            "services": { "type": "object", "properties": services },
            "state": { "type": "string" },
            "description": { "type": "string" },
            "tags": { "type": "array", "items": { "type": "string" } }
        }
    })
}
