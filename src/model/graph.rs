use log::debug;
use serde_json::{Map, Value as Json};
use std::collections::{BTreeSet, HashSet};

use crate::error::{HermsError, Result};
use crate::model::{
    DataType, Node, NodeConfig, NodeId, NodeTypeId, Primitive, Property, PropertyRef,
    Repository, StateId, TagId, Value,
};

/// Mutations of the node graph. Every mutation keeps the reverse property
/// index, the flat tag lists and the tag/state indices consistent.
impl Repository {
    /// Create an empty node. Names are unique within a node type.
    pub fn add_node(&mut self, node_type: NodeTypeId, name: &str) -> Result<NodeId> {
        if name.is_empty() || name.contains(':') {
            return Err(HermsError::schema(format!("invalid node name '{}'", name)));
        }
        let type_name = self
            .node_type(node_type)
            .map(|t| t.name.clone())
            .ok_or_else(|| HermsError::not_found("node type", format!("#{}", node_type.0)))?;
        let index = &mut self.type_nodes[node_type.0];
        if index.by_name.contains_key(name) {
            return Err(HermsError::schema(format!(
                "node '{}:{}' already exists",
                type_name, name
            )));
        }
        let id = NodeId(self.nodes.len());
        index.by_name.insert(name.to_string(), id);
        index.order.insert(id);
        self.nodes.push(Some(Node::new(id, node_type, name)));
        debug!("Added node {}:{}", type_name, name);
        Ok(id)
    }

    /// Apply a node configuration: state, explicit tags, properties (decoded
    /// through the converters, falling back to defaults) and per-service
    /// configuration. Previous tags and properties are replaced.
    pub fn configure_node(&mut self, id: NodeId, cfg: &NodeConfig) -> Result<()> {
        let node_type = self.node_ref(id)?.node_type;
        let label = self.node_label(id);

        let state = match &cfg.state {
            Some(name) => Some(self.state_id(name).ok_or_else(|| {
                HermsError::schema(format!("node '{}': unknown state '{}'", label, name))
            })?),
            None => None,
        };

        let visible: Vec<Property> = self
            .visible_properties(node_type)
            .into_iter()
            .cloned()
            .collect();
        for name in cfg.properties.keys() {
            if !visible.iter().any(|p| &p.name == name) {
                return Err(HermsError::schema(format!(
                    "node '{}': unknown property '{}'",
                    label, name
                )));
            }
        }

        let mut services = Vec::new();
        for (name, value) in &cfg.services {
            let service = self.service(name).ok_or_else(|| {
                HermsError::schema(format!("node '{}': unknown service '{}'", label, name))
            })?;
            check_shape(&service.node_config_schema(), value).map_err(|e| {
                HermsError::schema(format!("node '{}': service '{}': {}", label, name, e))
            })?;
            services.push((name.clone(), value.clone()));
        }

        // decode and check everything before the node is touched
        let mut values = Vec::with_capacity(visible.len());
        for prop in &visible {
            let raw = match cfg.properties.get(&prop.name) {
                Some(raw) if !raw.is_null() => raw.clone(),
                _ => prop.default.clone().unwrap_or(Json::Null),
            };
            if raw.is_null() && prop.required {
                return Err(HermsError::schema(format!(
                    "node '{}': required property '{}' is missing",
                    label, prop.name
                )));
            }
            let value = self
                .decode_value(prop, &raw)
                .and_then(|value| self.validate(prop, value))
                .map_err(|e| {
                    HermsError::value(format!("node '{}', property '{}': {}", label, prop.name, e))
                })?;
            values.push((prop.reference(), value));
        }
        for name in &cfg.tags {
            if name.split('.').any(str::is_empty) {
                return Err(HermsError::schema(format!(
                    "node '{}': invalid tag name '{}'",
                    label, name
                )));
            }
        }

        self.clear_node_content(id)?;
        for name in &cfg.tags {
            let tag = self.tag_or_create(name, None)?;
            self.add_node_tag(id, tag)?;
        }
        for (prop, value) in values {
            self.set_prop(id, prop, value)?;
        }

        self.set_state(id, state)?;
        let node = self.node_mut(id)?;
        node.description = cfg.description.clone();
        node.service_configs = services.into_iter().collect();
        Ok(())
    }

    fn clear_node_content(&mut self, id: NodeId) -> Result<()> {
        let props: Vec<PropertyRef> = self.node_ref(id)?.properties.keys().copied().collect();
        for prop in props {
            self.set_prop(id, prop, Value::Null)?;
        }
        let tags = self.node_ref(id)?.tags.clone();
        for tag in tags {
            self.remove_node_tag(id, tag)?;
        }
        Ok(())
    }

    /// Set a property by name, looking it up along the node's base chain.
    pub fn set_prop_by_name(&mut self, id: NodeId, name: &str, value: Value) -> Result<()> {
        let node_type = self.node_ref(id)?.node_type;
        let prop = self
            .find_property(node_type, name)
            .map(Property::reference)
            .ok_or_else(|| HermsError::not_found("property", name))?;
        self.set_prop(id, prop, value)
    }

    /// Set a property value. `Value::Null` (or an empty list) clears it.
    ///
    /// Node-valued properties update the targets' reverse index; tag-valued
    /// properties update the flat tag list. Both only touch the items that
    /// differ between the old and the new value.
    pub fn set_prop(&mut self, id: NodeId, prop: PropertyRef, value: Value) -> Result<()> {
        let property = self
            .property(prop)
            .cloned()
            .ok_or_else(|| HermsError::not_found("property", format!("{:?}", prop)))?;
        let node_type = self.node_ref(id)?.node_type;
        if !self.is_subtype(node_type, property.owner) {
            return Err(HermsError::value(format!(
                "property '{}' is not declared on '{}'",
                property.name,
                self.type_name(node_type)
            )));
        }
        let value = self.validate(&property, value)?;

        let old = self.node_ref(id)?.properties.get(&prop).cloned().unwrap_or(Value::Null);
        if property.is_node() {
            let old_set: BTreeSet<NodeId> = old.items().into_iter().filter_map(Value::as_node).collect();
            let new_set: BTreeSet<NodeId> =
                value.items().into_iter().filter_map(Value::as_node).collect();
            for target in old_set.difference(&new_set) {
                if let Some(t) = self.get_node_mut(*target) {
                    if let Some(refs) = t.properties_rev.get_mut(&prop) {
                        refs.remove(&id);
                        if refs.is_empty() {
                            t.properties_rev.remove(&prop);
                        }
                    }
                }
            }
            for target in new_set.difference(&old_set) {
                self.node_mut(*target)?
                    .properties_rev
                    .entry(prop)
                    .or_default()
                    .insert(id);
            }
        } else if property.is_tag() {
            let old_tags: Vec<TagId> = old.items().into_iter().filter_map(Value::as_tag).collect();
            let new_tags: Vec<TagId> =
                value.items().into_iter().filter_map(Value::as_tag).collect();
            for tag in old_tags.iter().filter(|t| !new_tags.contains(t)) {
                self.remove_node_tag(id, *tag)?;
            }
            for tag in new_tags.iter().filter(|t| !old_tags.contains(t)) {
                self.push_node_tag(id, *tag)?;
            }
        }

        let node = self.node_mut(id)?;
        if value.items().is_empty() {
            node.properties.remove(&prop);
        } else {
            node.properties.insert(prop, value);
        }
        Ok(())
    }

    /// Check a value against a property declaration. Integers are widened
    /// for `number` properties; a single value for a list property becomes a
    /// one-item list.
    fn validate(&self, prop: &Property, value: Value) -> Result<Value> {
        let check = |item: Value| -> Result<Value> {
            let ok = match (&prop.data_type, &item) {
                (DataType::Primitive(Primitive::String), Value::String(_)) => true,
                (DataType::Primitive(Primitive::Integer), Value::Integer(_)) => true,
                (DataType::Primitive(Primitive::Number), Value::Number(_)) => true,
                (DataType::Primitive(Primitive::Number), Value::Integer(i)) => {
                    return Ok(Value::Number(*i as f64))
                }
                (DataType::Primitive(Primitive::Boolean), Value::Boolean(_)) => true,
                (DataType::Tag(None), Value::Tag(t)) => self.tags.get(*t).is_some(),
                (DataType::Tag(Some(ns)), Value::Tag(t)) => self.tags.isa(*t, *ns),
                (DataType::Node(None), Value::Node(n)) => self.get_node(*n).is_some(),
                (DataType::Node(Some(ty)), Value::Node(n)) => self
                    .get_node(*n)
                    .map(|node| self.is_subtype(node.node_type, *ty))
                    .unwrap_or(false),
                (DataType::Custom(_), _) | (DataType::Any, _) => true,
                _ => false,
            };
            if ok {
                Ok(item)
            } else {
                Err(HermsError::value(format!(
                    "{} does not fit property '{}' of type {}",
                    item,
                    prop.name,
                    prop.data_type.describe(self)
                )))
            }
        };
        match value {
            Value::Null => Ok(Value::Null),
            Value::List(items) if prop.list => items
                .into_iter()
                .map(check)
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            Value::List(_) if !matches!(prop.data_type, DataType::Any) => Err(HermsError::value(
                format!("property '{}' holds a single value", prop.name),
            )),
            single if prop.list => Ok(Value::List(vec![check(single)?])),
            single => check(single),
        }
    }

    fn push_node_tag(&mut self, id: NodeId, tag: TagId) -> Result<()> {
        if self.tags.get(tag).is_none() {
            return Err(HermsError::not_found("tag", format!("#{}", tag.0)));
        }
        self.node_mut(id)?.tags.push(tag);
        self.tag_nodes.entry(tag).or_default().insert(id);
        Ok(())
    }

    /// Add an explicit tag to a node. A tag already in the list is not added
    /// twice.
    pub fn add_node_tag(&mut self, id: NodeId, tag: TagId) -> Result<()> {
        if self.node_ref(id)?.has_tag(tag) {
            return Ok(());
        }
        self.push_node_tag(id, tag)
    }

    /// Remove one occurrence of `tag` from the flat tag list.
    pub fn remove_node_tag(&mut self, id: NodeId, tag: TagId) -> Result<bool> {
        let node = self.node_mut(id)?;
        let Some(pos) = node.tags.iter().position(|t| *t == tag) else {
            return Ok(false);
        };
        node.tags.remove(pos);
        if !node.tags.contains(&tag) {
            if let Some(members) = self.tag_nodes.get_mut(&tag) {
                members.remove(&id);
                if members.is_empty() {
                    self.tag_nodes.remove(&tag);
                }
            }
        }
        Ok(true)
    }

    pub fn set_state(&mut self, id: NodeId, state: Option<StateId>) -> Result<()> {
        if let Some(s) = state {
            if self.state(s).is_none() {
                return Err(HermsError::not_found("state", format!("#{}", s.0)));
            }
        }
        let node = self.node_mut(id)?;
        let old = std::mem::replace(&mut node.state, state);
        if old == state {
            return Ok(());
        }
        if let Some(old) = old {
            if let Some(members) = self.state_nodes.get_mut(&old) {
                members.remove(&id);
            }
        }
        if let Some(new) = state {
            self.state_nodes.entry(new).or_default().insert(id);
        }
        Ok(())
    }

    /// Remove a node, clearing the references it holds and the references
    /// other nodes hold to it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        let props: Vec<PropertyRef> = self.node_ref(id)?.properties.keys().copied().collect();
        for prop in props {
            self.set_prop(id, prop, Value::Null)?;
        }
        let incoming: Vec<(PropertyRef, Vec<NodeId>)> = self
            .node_ref(id)?
            .properties_rev
            .iter()
            .map(|(p, refs)| (*p, refs.iter().copied().collect()))
            .collect();
        for (prop, referrers) in incoming {
            for referrer in referrers {
                let remaining = match self.node_ref(referrer)?.properties.get(&prop) {
                    Some(Value::List(items)) => Value::List(
                        items
                            .iter()
                            .filter(|v| v.as_node() != Some(id))
                            .cloned()
                            .collect(),
                    ),
                    _ => Value::Null,
                };
                self.set_prop(referrer, prop, remaining)?;
            }
        }

        let node = self
            .nodes
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or_else(|| HermsError::not_found("node", format!("#{}", id.0)))?;
        for tag in &node.tags {
            if let Some(members) = self.tag_nodes.get_mut(tag) {
                members.remove(&id);
            }
        }
        if let Some(state) = node.state {
            if let Some(members) = self.state_nodes.get_mut(&state) {
                members.remove(&id);
            }
        }
        if let Some(index) = self.type_nodes.get_mut(node.node_type.0) {
            index.order.remove(&id);
            index.by_name.remove(&node.name);
        }
        debug!("Removed node {}:{}", self.type_name(node.node_type), node.name);
        Ok(())
    }

    /// Remove a tag and its subtree, stripping the tags from every node and
    /// tag-valued property. Returns the removed tags.
    pub fn remove_tag(&mut self, tag: TagId) -> Result<Vec<TagId>> {
        let removed = self.tags.walk(tag);
        let gone: HashSet<TagId> = removed.iter().copied().collect();
        let mut touched = BTreeSet::new();
        for t in &removed {
            if let Some(members) = self.tag_nodes.remove(t) {
                touched.extend(members);
            }
        }
        for id in touched {
            let node = self.node_mut(id)?;
            node.tags.retain(|t| !gone.contains(t));
            for value in node.properties.values_mut() {
                if let Value::List(items) = value {
                    items.retain(|v| !v.as_tag().map_or(false, |t| gone.contains(&t)));
                } else if value.as_tag().map_or(false, |t| gone.contains(&t)) {
                    *value = Value::Null;
                }
            }
            node.properties.retain(|_, v| !v.items().is_empty());
        }
        self.tags.remove(tag);
        Ok(removed)
    }

    /// Configuration of a node, as accepted by [`configure_node`](Self::configure_node).
    pub fn dump_node(&self, id: NodeId) -> Result<NodeConfig> {
        let node = self.node_ref(id)?;
        let mut properties = Map::new();
        let mut property_tags: Vec<TagId> = Vec::new();
        for prop in self.visible_properties(node.node_type) {
            if let Some(value) = node.properties.get(&prop.reference()) {
                properties.insert(prop.name.clone(), self.encode_value(prop, value)?);
                if prop.is_tag() {
                    property_tags.extend(value.items().into_iter().filter_map(Value::as_tag));
                }
            }
        }
        // tags contributed by properties come back through the properties
        let mut tags = Vec::new();
        for tag in &node.tags {
            match property_tags.iter().position(|t| t == tag) {
                Some(pos) => {
                    property_tags.remove(pos);
                }
                None => tags.push(self.tags.abs_name(*tag)),
            }
        }
        let mut services: Vec<(&String, &Json)> = node.service_configs.iter().collect();
        services.sort_by(|a, b| a.0.cmp(b.0));
        Ok(NodeConfig {
            description: node.description.clone(),
            state: node.state.map(|s| self.state_name(s).to_string()),
            properties,
            services: services
                .into_iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            tags,
        })
    }

    /// Verify the reverse property index against the forward values, and the
    /// tag and state indices against the nodes.
    pub fn check_integrity(&self) -> Result<()> {
        for node in self.nodes.iter().flatten() {
            for (prop, value) in &node.properties {
                let property = self.property(*prop).ok_or_else(|| {
                    HermsError::Integrity(format!("{}: unknown property {:?}", node.name, prop))
                })?;
                if property.is_node() {
                    for target in value.items().into_iter().filter_map(Value::as_node) {
                        let linked = self
                            .get_node(target)
                            .and_then(|t| t.properties_rev.get(prop))
                            .map_or(false, |refs| refs.contains(&node.id));
                        if !linked {
                            return Err(HermsError::Integrity(format!(
                                "{}.{} -> {} has no reverse entry",
                                self.node_label(node.id),
                                property.name,
                                self.node_label(target)
                            )));
                        }
                    }
                }
                if property.is_tag() {
                    for tag in value.items().into_iter().filter_map(Value::as_tag) {
                        if !node.tags.contains(&tag) {
                            return Err(HermsError::Integrity(format!(
                                "{}.{}: tag {} missing from the tag list",
                                self.node_label(node.id),
                                property.name,
                                self.tags.abs_name(tag)
                            )));
                        }
                    }
                }
            }
            for (prop, referrers) in &node.properties_rev {
                for referrer in referrers {
                    let holds = self
                        .get_node(*referrer)
                        .and_then(|r| r.properties.get(prop))
                        .map_or(false, |v| v.items().iter().any(|x| x.as_node() == Some(node.id)));
                    if !holds {
                        return Err(HermsError::Integrity(format!(
                            "{} lists {} as referrer but it holds no reference",
                            self.node_label(node.id),
                            self.node_label(*referrer)
                        )));
                    }
                }
            }
            for tag in &node.tags {
                if !self.tag_nodes.get(tag).map_or(false, |m| m.contains(&node.id)) {
                    return Err(HermsError::Integrity(format!(
                        "{}: tag {} not indexed",
                        self.node_label(node.id),
                        self.tags.abs_name(*tag)
                    )));
                }
            }
            if let Some(state) = node.state {
                if !self.state_nodes.get(&state).map_or(false, |m| m.contains(&node.id)) {
                    return Err(HermsError::Integrity(format!(
                        "{}: state not indexed",
                        self.node_label(node.id)
                    )));
                }
            }
        }
        for (tag, members) in &self.tag_nodes {
            for id in members {
                if !self.get_node(*id).map_or(false, |n| n.tags.contains(tag)) {
                    return Err(HermsError::Integrity(format!(
                        "tag index lists {} under {} but the node lacks it",
                        self.node_label(*id),
                        self.tags.abs_name(*tag)
                    )));
                }
            }
        }
        for (state, members) in &self.state_nodes {
            for id in members {
                if self.get_node(*id).and_then(|n| n.state) != Some(*state) {
                    return Err(HermsError::Integrity(format!(
                        "state index lists {} under {}",
                        self.node_label(*id),
                        self.state_name(*state)
                    )));
                }
            }
        }
        Ok(())
    }

    fn node_ref(&self, id: NodeId) -> Result<&Node> {
        self.get_node(id)
            .ok_or_else(|| HermsError::not_found("node", format!("#{}", id.0)))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.get_node_mut(id)
            .ok_or_else(|| HermsError::not_found("node", format!("#{}", id.0)))
    }
}

/// Check the top-level `type` of a service's node configuration schema.
fn check_shape(schema: &Json, value: &Json) -> std::result::Result<(), String> {
    let expected = match schema.get("type").and_then(Json::as_str) {
        Some(t) => t,
        None => return Ok(()),
    };
    let ok = match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("expected {}, got {}", expected, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RepositoryConfig;
    use serde_json::json;

    fn repo() -> Repository {
        let cfg: RepositoryConfig = serde_json::from_value(json!({
            "tags": {"tag1": "", "tagcat": {"children": ["t1", "t2", "t3"]}},
            "types": {
                "type1": {"properties": {
                    "foo": {"type": "type2"},
                    "bar": {"type": "type3", "list": true},
                    "val": "int"
                }},
                "type2": {"properties": {"num": {"type": "int", "default": 0}}},
                "type3": {"properties": {
                    "tagcat": {"type": "tagcat", "list": true},
                    "tag": "tag"
                }}
            },
            "states": {"s1": {}, "s2": {}},
            "nodes": {
                "type2": {"n21": {"properties": {"num": 10}}, "n22": {}},
                "type3": {
                    "n31": {"properties": {"tagcat": ["t1", "t2"], "tag": "tag1"}},
                    "n32": {}
                },
                "type1": {
                    "n11": {"state": "s1", "tags": ["tag1"],
                            "properties": {"foo": "n21", "bar": ["n31", "n32"], "val": 4}}
                }
            }
        }))
        .unwrap();
        let mut repo = Repository::new();
        repo.configure(&cfg).unwrap();
        repo
    }

    fn prop(repo: &Repository, ty: &str, name: &str) -> PropertyRef {
        let ty = repo.node_type_id(ty).unwrap();
        repo.find_property(ty, name).unwrap().reference()
    }

    fn id(repo: &Repository, name: &str) -> NodeId {
        repo.node_or_error(name, None).unwrap()
    }

    #[test]
    fn test_reverse_index_follows_forward_values() {
        let mut repo = repo();
        let foo = prop(&repo, "type1", "foo");
        let bar = prop(&repo, "type1", "bar");
        let (n11, n21, n22, n31, n32) = (
            id(&repo, "n11"),
            id(&repo, "n21"),
            id(&repo, "n22"),
            id(&repo, "n31"),
            id(&repo, "n32"),
        );
        assert_eq!(repo.get_node(n21).unwrap().referrers(foo).collect::<Vec<_>>(), vec![n11]);
        repo.check_integrity().unwrap();

        repo.set_prop(n11, foo, Value::Node(n22)).unwrap();
        assert_eq!(repo.get_node(n21).unwrap().referrers(foo).count(), 0);
        assert_eq!(repo.get_node(n22).unwrap().referrers(foo).collect::<Vec<_>>(), vec![n11]);

        repo.set_prop(n11, bar, Value::List(vec![Value::Node(n32)])).unwrap();
        assert_eq!(repo.get_node(n31).unwrap().referrers(bar).count(), 0);
        assert_eq!(repo.get_node(n32).unwrap().referrers(bar).count(), 1);
        repo.check_integrity().unwrap();
    }

    #[test]
    fn test_tag_property_keeps_flat_list_in_sync() {
        let mut repo = repo();
        let tagcat = prop(&repo, "type3", "tagcat");
        let n31 = id(&repo, "n31");
        let t1 = repo.tag("tagcat.t1").unwrap();
        let t2 = repo.tag("t2").unwrap();
        let t3 = repo.tag("t3").unwrap();
        let tag1 = repo.tag("tag1").unwrap();
        assert_eq!(repo.get_node(n31).unwrap().tags, vec![t1, t2, tag1]);

        repo.set_prop(n31, tagcat, Value::List(vec![Value::Tag(t2), Value::Tag(t3)]))
            .unwrap();
        // t2 stays in place, t1 goes, t3 is appended
        assert_eq!(repo.get_node(n31).unwrap().tags, vec![t2, tag1, t3]);
        assert_eq!(repo.tag_members(t1).count(), 0);
        assert_eq!(repo.tag_members(t3).collect::<Vec<_>>(), vec![n31]);
        repo.check_integrity().unwrap();
    }

    #[test]
    fn test_tag_property_rejects_foreign_namespace() {
        let mut repo = repo();
        let tagcat = prop(&repo, "type3", "tagcat");
        let n31 = id(&repo, "n31");
        let tag1 = repo.tag("tag1").unwrap();
        let err = repo
            .set_prop(n31, tagcat, Value::List(vec![Value::Tag(tag1)]))
            .unwrap_err();
        assert!(matches!(err, HermsError::Value(_)));
    }

    #[test]
    fn test_remove_node_clears_references() {
        let mut repo = repo();
        let foo = prop(&repo, "type1", "foo");
        let bar = prop(&repo, "type1", "bar");
        let n11 = id(&repo, "n11");
        let n31 = id(&repo, "n31");
        repo.remove_node(n31).unwrap();
        assert_eq!(
            repo.get_node(n11).unwrap().prop(bar).unwrap(),
            &Value::List(vec![Value::Node(id(&repo, "n32"))])
        );
        repo.remove_node(id(&repo, "n21")).unwrap();
        assert!(repo.get_node(n11).unwrap().prop(foo).is_none());
        assert!(repo.node("n21", None).unwrap().is_none());
        repo.check_integrity().unwrap();
    }

    #[test]
    fn test_defaults_required_and_unknown() {
        let mut repo = repo();
        let num = prop(&repo, "type2", "num");
        let n22 = id(&repo, "n22");
        assert_eq!(repo.get_node(n22).unwrap().prop(num), Some(&Value::Integer(0)));

        let bad: NodeConfig =
            serde_json::from_value(json!({"properties": {"nosuch": 1}})).unwrap();
        assert!(matches!(
            repo.configure_node(n22, &bad),
            Err(HermsError::Schema(_))
        ));
        let bad: NodeConfig =
            serde_json::from_value(json!({"properties": {"num": "many"}})).unwrap();
        assert!(matches!(repo.configure_node(n22, &bad), Err(HermsError::Value(_))));
    }

    #[test]
    fn test_failed_configure_leaves_node_untouched() {
        let mut repo = repo();
        let n11 = id(&repo, "n11");
        let n31 = id(&repo, "n31");
        let before = repo.dump_node(n11).unwrap();

        let bad: NodeConfig = serde_json::from_value(json!({
            "properties": {"val": "many"},
            "tags": ["brandnew"]
        }))
        .unwrap();
        assert!(matches!(repo.configure_node(n11, &bad), Err(HermsError::Value(_))));
        assert_eq!(repo.dump_node(n11).unwrap(), before);
        assert!(repo.tag("brandnew").is_none());

        // tag1 decodes but lies outside the tagcat namespace
        let before = repo.dump_node(n31).unwrap();
        let bad: NodeConfig =
            serde_json::from_value(json!({"properties": {"tagcat": ["tag1"]}})).unwrap();
        assert!(repo.configure_node(n31, &bad).is_err());
        assert_eq!(repo.dump_node(n31).unwrap(), before);

        let bad: NodeConfig = serde_json::from_value(json!({"tags": ["a..b"]})).unwrap();
        assert!(matches!(repo.configure_node(n31, &bad), Err(HermsError::Schema(_))));
        assert_eq!(repo.dump_node(n31).unwrap(), before);
        repo.check_integrity().unwrap();
    }

    #[test]
    fn test_dump_round_trip() {
        let mut repo = repo();
        let n11 = id(&repo, "n11");
        let n31 = id(&repo, "n31");
        let dumped = repo.dump_node(n11).unwrap();
        assert_eq!(dumped.state.as_deref(), Some("s1"));
        assert_eq!(dumped.tags, vec!["tag1".to_string()]);
        assert_eq!(dumped.properties["foo"], json!("n21"));
        assert_eq!(dumped.properties["bar"], json!(["n31", "n32"]));
        assert_eq!(dumped.properties["val"], json!(4));

        let tags = repo.dump_node(n31).unwrap();
        assert!(tags.tags.is_empty());
        assert_eq!(tags.properties["tagcat"], json!(["t1", "t2"]));
        assert_eq!(tags.properties["tag"], json!("tag1"));

        repo.configure_node(n11, &dumped).unwrap();
        assert_eq!(repo.dump_node(n11).unwrap(), dumped);
        repo.check_integrity().unwrap();
    }

    #[test]
    fn test_remove_tag_strips_nodes() {
        let mut repo = repo();
        let tagcat = repo.tag("tagcat").unwrap();
        let n31 = id(&repo, "n31");
        let removed = repo.remove_tag(tagcat).unwrap();
        assert_eq!(removed.len(), 4);
        let node = repo.get_node(n31).unwrap();
        assert_eq!(node.tags, vec![repo.tag("tag1").unwrap()]);
        assert!(repo.tag("t1").is_none());
        repo.check_integrity().unwrap();
    }

    #[test]
    fn test_state_index() {
        let mut repo = repo();
        let s1 = repo.state_id("s1").unwrap();
        let s2 = repo.state_id("s2").unwrap();
        let n11 = id(&repo, "n11");
        assert_eq!(repo.state_members(s1).collect::<Vec<_>>(), vec![n11]);
        repo.set_state(n11, Some(s2)).unwrap();
        assert_eq!(repo.state_members(s1).count(), 0);
        assert_eq!(repo.state_members(s2).collect::<Vec<_>>(), vec![n11]);
        repo.check_integrity().unwrap();
    }
}
