use log::{debug, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{HermsError, Result};
use crate::logic::{compile, AllExecutor, AndExecutor, Executor, Query, RepositoryBackend};
use crate::model::{
    node_config_schema, ConverterRegistry, DataType, DataTypeConverter, Node, NodeConfig,
    NodeId, NodeType, NodeTypeConfig, NodeTypeId, Owned, OwnedMap, Primitive, Property,
    PropertyConfig, ServiceStateConfig, State, StateConfig, StateId, TagForest, TagId,
    Transition, TransitionConfig, Value,
};
use crate::service::Service;

/// Repository shared between the convergence engine and services.
pub type SharedRepository = Arc<RwLock<Repository>>;

/// In-memory repository configuration.
///
/// Maps keep declaration order, which is the order types, states and
/// transitions are created in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Tag forest: a list of names or a map of tag entries.
    #[serde(default)]
    pub tags: Json,
    /// Node type name to [`NodeTypeConfig`].
    #[serde(default)]
    pub types: Map<String, Json>,
    /// State name to [`StateConfig`] (or a description string).
    #[serde(default)]
    pub states: Map<String, Json>,
    /// Node type name to a map of node name to [`NodeConfig`].
    #[serde(default)]
    pub nodes: Map<String, Json>,
}

/// A registered service.
#[derive(Clone)]
pub struct ServiceEntry {
    pub name: String,
    pub service: Arc<dyn Service>,
}

impl fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ServiceEntry").field("name", &self.name).finish()
    }
}

impl Owned for ServiceEntry {
    type Owner = ();

    fn assign(&mut self, _: (), name: &str, _: usize) {
        self.name = name.to_string();
    }
}

/// Nodes of one type: creation order plus the by-name index.
#[derive(Debug, Clone, Default)]
pub(crate) struct NameIndex {
    pub(crate) order: BTreeSet<NodeId>,
    pub(crate) by_name: HashMap<String, NodeId>,
}

/// Owner of node types, tags, states, services and nodes.
#[derive(Debug)]
pub struct Repository {
    pub(crate) types: OwnedMap<NodeType>,
    pub(crate) tags: TagForest,
    pub(crate) states: OwnedMap<State>,
    pub(crate) services: OwnedMap<ServiceEntry>,
    /// Arena indexed by `NodeId`; removed nodes leave `None`.
    pub(crate) nodes: Vec<Option<Node>>,
    /// Indexed by `NodeTypeId`.
    pub(crate) type_nodes: Vec<NameIndex>,
    pub(crate) state_nodes: HashMap<StateId, BTreeSet<NodeId>>,
    /// Nodes carrying exactly this tag in their flat tag list.
    pub(crate) tag_nodes: HashMap<TagId, BTreeSet<NodeId>>,
    pub(crate) converters: ConverterRegistry,
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository {
    pub fn new() -> Self {
        Self {
            types: OwnedMap::new(()),
            tags: TagForest::new(),
            states: OwnedMap::new(()),
            services: OwnedMap::new(()),
            nodes: Vec::new(),
            type_nodes: Vec::new(),
            state_nodes: HashMap::new(),
            tag_nodes: HashMap::new(),
            converters: ConverterRegistry::default(),
        }
    }

    pub fn into_shared(self) -> SharedRepository {
        Arc::new(RwLock::new(self))
    }

    //
    // Configuration
    //

    /// Replace the repository content from `config`. Registered services and
    /// converters are kept.
    pub fn configure(&mut self, config: &RepositoryConfig) -> Result<()> {
        self.clear();
        self.tags.configure(None, &config.tags)?;

        // every type name is known before any property type is resolved
        for name in config.types.keys() {
            self.declare_node_type(name);
        }
        for (name, raw) in &config.types {
            let cfg: NodeTypeConfig = match raw {
                Json::Null => NodeTypeConfig::default(),
                other => serde_json::from_value(other.clone())
                    .map_err(|e| HermsError::schema(format!("type '{}': {}", name, e)))?,
            };
            self.define_node_type(name, &cfg)?;
        }
        self.check_type_cycles()?;

        for name in config.states.keys() {
            self.declare_state(name);
        }
        for (name, raw) in &config.states {
            self.define_state(name, &StateConfig::from_json(raw)?)?;
        }

        // all nodes exist before any is configured so references resolve
        let mut pending = Vec::new();
        for (type_name, entries) in &config.nodes {
            let ty = self
                .node_type_id(type_name)
                .ok_or_else(|| HermsError::schema(format!("nodes: unknown type '{}'", type_name)))?;
            let entries = match entries {
                Json::Null => continue,
                Json::Object(entries) => entries,
                other => {
                    return Err(HermsError::schema(format!(
                        "nodes of '{}' must be an object, got {}",
                        type_name, other
                    )))
                }
            };
            for (name, raw) in entries {
                let cfg: NodeConfig = match raw {
                    Json::Null => NodeConfig::default(),
                    other => serde_json::from_value(other.clone()).map_err(|e| {
                        HermsError::schema(format!("node '{}:{}': {}", type_name, name, e))
                    })?,
                };
                pending.push((self.add_node(ty, name)?, cfg));
            }
        }
        for (id, cfg) in &pending {
            self.configure_node(*id, cfg)?;
        }

        self.refresh()?;
        info!(
            "Repository configured: {} types, {} tags, {} states, {} nodes",
            self.types.len(),
            self.tags.len(),
            self.states.len(),
            pending.len()
        );
        Ok(())
    }

    fn clear(&mut self) {
        self.types.clear();
        self.tags.clear();
        self.states.clear();
        self.nodes.clear();
        self.type_nodes.clear();
        self.state_nodes.clear();
        self.tag_nodes.clear();
    }

    /// Re-bind every stored query (state conditions, transition guards, tag
    /// expressions) against the current schema. Call after adding types,
    /// states or tags by code.
    pub fn refresh(&mut self) -> Result<()> {
        let mut bound_states = Vec::new();
        for state in self.states.iter() {
            let condition = state.condition.bind(self)?;
            let guards = state
                .transitions
                .iter()
                .map(|t| t.guard.bind(self))
                .collect::<Result<Vec<_>>>()?;
            bound_states.push((state.id, condition, guards));
        }
        let mut bound_tags = Vec::new();
        for id in self.tags.all() {
            if let Some(query) = self.tags.get(id).and_then(|t| t.expression.as_ref()) {
                bound_tags.push((id, query.bind(self)?));
            }
        }

        for (id, condition, guards) in bound_states {
            if let Some(state) = self.states.at_mut(id.0) {
                state.condition.set_bound(condition);
                for (transition, guard) in state.transitions.iter_mut().zip(guards) {
                    transition.guard.set_bound(guard);
                }
            }
        }
        for (id, expr) in bound_tags {
            if let Some(query) = self.tags.get_mut(id).and_then(|t| t.expression.as_mut()) {
                query.set_bound(expr);
            }
        }
        debug!("Repository queries re-bound");
        Ok(())
    }

    //
    // Node types
    //

    fn declare_node_type(&mut self, name: &str) -> NodeTypeId {
        if let Some(slot) = self.types.slot_of(name) {
            return NodeTypeId(slot);
        }
        let id = NodeTypeId(self.types.len());
        self.types.insert(name, NodeType::new(id));
        self.type_nodes.push(NameIndex::default());
        id
    }

    fn define_node_type(&mut self, name: &str, cfg: &NodeTypeConfig) -> Result<NodeTypeId> {
        let id = self.declare_node_type(name);
        let base = match &cfg.base {
            Some(base) => Some(self.node_type_id(base).ok_or_else(|| {
                HermsError::schema(format!("type '{}': unknown base type '{}'", name, base))
            })?),
            None => None,
        };
        let configs = cfg
            .property_configs()
            .map_err(|e| HermsError::schema(format!("type '{}': {}", name, e)))?;
        let mut props = Vec::with_capacity(configs.len());
        for (prop_name, prop_cfg) in configs {
            let data_type = self.resolve_type(prop_cfg.type_name()).map_err(|e| {
                HermsError::schema(format!("{}.{}: {}", name, prop_name, e))
            })?;
            let mut prop = Property::new(data_type);
            if let PropertyConfig::Full {
                required,
                list,
                default,
                description,
                ..
            } = prop_cfg
            {
                prop.required = required;
                prop.list = list;
                prop.default = default;
                prop.description = description;
            }
            props.push((prop_name, prop));
        }

        let ty = self
            .types
            .at_mut(id.0)
            .ok_or_else(|| HermsError::not_found("node type", name))?;
        ty.base = base;
        ty.description = cfg.description.clone();
        ty.properties.clear();
        for (prop_name, prop) in props {
            ty.properties.insert(&prop_name, prop);
        }
        Ok(id)
    }

    /// Add (or redefine) a node type by code. Property types may only refer
    /// to types and tags that already exist.
    pub fn add_node_type(&mut self, name: &str, cfg: &NodeTypeConfig) -> Result<NodeTypeId> {
        let id = self.define_node_type(name, cfg)?;
        self.check_type_cycles()?;
        Ok(id)
    }

    /// Resolve a property type name. Order: primitive names and aliases,
    /// `tag`, `node`, `any`, node type names, tag names (namespaces), custom
    /// converters.
    pub fn resolve_type(&self, name: &str) -> Result<DataType> {
        if let Some(primitive) = Primitive::from_name(name) {
            return Ok(DataType::Primitive(primitive));
        }
        match name {
            "tag" => return Ok(DataType::Tag(None)),
            "node" => return Ok(DataType::Node(None)),
            "any" => return Ok(DataType::Any),
            _ => {}
        }
        if let Some(ty) = self.node_type_id(name) {
            return Ok(DataType::Node(Some(ty)));
        }
        if let Some(tag) = self.tags.lookup(name) {
            return Ok(DataType::Tag(Some(tag)));
        }
        if self.converters.contains(name) {
            return Ok(DataType::Custom(name.to_string()));
        }
        Err(HermsError::schema(format!("unknown data type '{}'", name)))
    }

    fn check_type_cycles(&self) -> Result<()> {
        for ty in self.types.iter() {
            let mut seen = HashSet::new();
            let mut cur = Some(ty.id);
            while let Some(t) = cur {
                if !seen.insert(t) {
                    return Err(HermsError::schema(format!(
                        "type '{}': base chain is cyclic",
                        ty.name
                    )));
                }
                cur = self.types.at(t.0).and_then(|x| x.base);
            }
        }
        Ok(())
    }

    pub fn node_type(&self, id: NodeTypeId) -> Option<&NodeType> {
        self.types.at(id.0)
    }

    pub fn node_type_id(&self, name: &str) -> Option<NodeTypeId> {
        self.types.slot_of(name).map(NodeTypeId)
    }

    pub fn node_type_by_name(&self, name: &str) -> Option<&NodeType> {
        self.types.get(name)
    }

    /// Node types in declaration order.
    pub fn types(&self) -> impl Iterator<Item = &NodeType> {
        self.types.iter()
    }

    pub fn type_name(&self, id: NodeTypeId) -> &str {
        self.types.at(id.0).map(|t| t.name.as_str()).unwrap_or("?")
    }

    /// `ty` followed by its base chain.
    pub fn ancestors(&self, ty: NodeTypeId) -> Vec<NodeTypeId> {
        let mut out = Vec::new();
        let mut cur = Some(ty);
        while let Some(t) = cur {
            // bases are checked for cycles on configuration; the bound keeps
            // a half-configured repository from looping
            if out.len() > self.types.len() || out.contains(&t) {
                break;
            }
            out.push(t);
            cur = self.types.at(t.0).and_then(|x| x.base);
        }
        out
    }

    pub fn is_subtype(&self, ty: NodeTypeId, of: NodeTypeId) -> bool {
        self.ancestors(ty).contains(&of)
    }

    /// `ty` and every type deriving from it, in declaration order.
    pub fn subtypes_of(&self, ty: NodeTypeId) -> Vec<NodeTypeId> {
        self.types
            .iter()
            .map(|t| t.id)
            .filter(|t| self.is_subtype(*t, ty))
            .collect()
    }

    /// Look a property up on `ty` and then along its base chain.
    pub fn find_property(&self, ty: NodeTypeId, name: &str) -> Option<&Property> {
        self.ancestors(ty)
            .into_iter()
            .find_map(|t| self.types.at(t.0).and_then(|x| x.property(name)))
    }

    /// Properties visible on `ty`, most derived declarations first. A name
    /// redeclared on a subtype hides the base declaration.
    pub fn visible_properties(&self, ty: NodeTypeId) -> Vec<&Property> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for t in self.ancestors(ty) {
            if let Some(node_type) = self.types.at(t.0) {
                for prop in node_type.properties.iter() {
                    if seen.insert(prop.name.as_str()) {
                        out.push(prop);
                    }
                }
            }
        }
        out
    }

    pub fn property(&self, prop: crate::model::PropertyRef) -> Option<&Property> {
        self.types.at(prop.owner.0)?.properties.at(prop.slot)
    }

    /// Configuration schema of nodes of `ty`, including per-service parts.
    pub fn node_config_schema(&self, ty: NodeTypeId) -> Json {
        let services: BTreeMap<String, Json> = self
            .services
            .iter()
            .map(|s| (s.name.clone(), s.service.node_config_schema()))
            .collect();
        node_config_schema(self.visible_properties(ty), services)
    }

    //
    // Tags
    //

    pub fn tags(&self) -> &TagForest {
        &self.tags
    }

    /// Find a tag by (possibly qualified) name.
    pub fn tag(&self, name: &str) -> Option<TagId> {
        self.tags.lookup(name)
    }

    pub fn add_tag(&mut self, parent: Option<TagId>, name: &str) -> Result<TagId> {
        self.tags.add(parent, name)
    }

    pub fn tag_or_create(&mut self, name: &str, parent: Option<TagId>) -> Result<TagId> {
        self.tags.tag_or_create(name, parent)
    }

    //
    // States
    //

    fn declare_state(&mut self, name: &str) -> StateId {
        match self.states.slot_of(name) {
            Some(slot) => StateId(slot),
            None => StateId(self.states.insert(name, State::new())),
        }
    }

    fn define_state(&mut self, name: &str, cfg: &StateConfig) -> Result<StateId> {
        let id = self.declare_state(name);
        let condition = Query::parse(&cfg.condition)?;

        let mut transitions = Vec::new();
        for (to, tcfg) in cfg.transition_configs()? {
            let to_id = self.state_id(&to).ok_or_else(|| {
                HermsError::schema(format!(
                    "state '{}': unknown transition target '{}'",
                    name, to
                ))
            })?;
            let (auto, guard) = TransitionConfig::parts(tcfg.as_ref());
            transitions.push(Transition {
                from: id,
                to: to_id,
                auto,
                guard: Query::parse(guard)?,
            });
        }

        let mut services = HashMap::new();
        match &cfg.services {
            None => {}
            Some(ServiceStateConfig::All(label)) => {
                for entry in self.services.iter() {
                    services.insert(entry.name.clone(), label.clone());
                }
            }
            Some(ServiceStateConfig::ByLabel(labels)) => {
                for (label, names) in labels {
                    for service in names.names() {
                        if !self.services.contains(service) {
                            return Err(HermsError::schema(format!(
                                "state '{}': unknown service '{}'",
                                name, service
                            )));
                        }
                        services.insert(service.to_string(), label.clone());
                    }
                }
            }
        }

        let state = self
            .states
            .at_mut(id.0)
            .ok_or_else(|| HermsError::not_found("state", name))?;
        state.description = cfg.description.clone();
        state.lifecycle = cfg.lifecycle;
        state.condition = condition;
        state.transitions = transitions;
        state.services = services;
        Ok(id)
    }

    /// Add (or redefine) a state by code. Transition targets must exist.
    /// Its queries are bound on the next [`refresh`](Self::refresh).
    pub fn add_state(&mut self, name: &str, cfg: &StateConfig) -> Result<StateId> {
        self.define_state(name, cfg)
    }

    pub fn state(&self, id: StateId) -> Option<&State> {
        self.states.at(id.0)
    }

    pub fn state_id(&self, name: &str) -> Option<StateId> {
        self.states.slot_of(name).map(StateId)
    }

    pub fn state_by_name(&self, name: &str) -> Option<&State> {
        self.states.get(name)
    }

    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.states.iter()
    }

    pub fn state_name(&self, id: StateId) -> &str {
        self.states.at(id.0).map(|s| s.name.as_str()).unwrap_or("?")
    }

    //
    // Services
    //

    pub fn add_service(&mut self, name: &str, service: Arc<dyn Service>) {
        self.services.insert(
            name,
            ServiceEntry {
                name: String::new(),
                service,
            },
        );
    }

    pub fn service(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.get(name).map(|s| s.service.clone())
    }

    /// Registered services in registration order.
    pub fn services(&self) -> Vec<(String, Arc<dyn Service>)> {
        self.services
            .iter()
            .map(|s| (s.name.clone(), s.service.clone()))
            .collect()
    }

    //
    // Converters
    //

    pub fn register_converter(&mut self, name: &str, converter: Arc<dyn DataTypeConverter>) {
        self.converters.register(name, converter);
    }

    pub fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    /// Decode the configuration form of a property value.
    pub fn decode_value(&self, prop: &Property, data: &Json) -> Result<Value> {
        let converter = self.converters.converter_for(&prop.data_type)?;
        if prop.list {
            match data {
                Json::Null => Ok(Value::List(Vec::new())),
                Json::Array(items) => items
                    .iter()
                    .map(|item| converter.decode(item, &prop.data_type, self))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::List),
                single => Ok(Value::List(vec![converter.decode(
                    single,
                    &prop.data_type,
                    self,
                )?])),
            }
        } else if data.is_null() {
            Ok(Value::Null)
        } else {
            converter.decode(data, &prop.data_type, self)
        }
    }

    pub fn encode_value(&self, prop: &Property, value: &Value) -> Result<Json> {
        let converter = self.converters.converter_for(&prop.data_type)?;
        match value {
            Value::Null => Ok(Json::Null),
            Value::List(items) if prop.list => items
                .iter()
                .map(|item| converter.encode(item, &prop.data_type, self))
                .collect::<Result<Vec<_>>>()
                .map(Json::Array),
            single => converter.encode(single, &prop.data_type, self),
        }
    }

    //
    // Nodes
    //

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(|n| n.as_ref())
    }

    pub(crate) fn get_node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(|n| n.as_mut())
    }

    pub fn node_count(&self) -> usize {
        self.type_nodes.iter().map(|idx| idx.order.len()).sum()
    }

    /// `type:name` of a node, for messages.
    pub fn node_label(&self, id: NodeId) -> String {
        match self.get_node(id) {
            Some(node) => format!("{}:{}", self.type_name(node.node_type), node.name),
            None => format!("#{}", id.0),
        }
    }

    /// Value of the property `name` on a node, looked up along its base chain.
    pub fn prop_value(&self, id: NodeId, name: &str) -> Option<&Value> {
        let node = self.get_node(id)?;
        let prop = self.find_property(node.node_type, name)?;
        node.prop(prop.reference())
    }

    /// Find a node by name. `TYPE:NAME` selects the type explicitly;
    /// otherwise `node_type` (and its subtypes) is searched, or every type
    /// when `None`. A name found under two types is an error.
    pub fn node(&self, name: &str, node_type: Option<NodeTypeId>) -> Result<Option<NodeId>> {
        let (node_type, name) = match name.split_once(':') {
            Some((ns, rest)) => (
                Some(
                    self.node_type_id(ns)
                        .ok_or_else(|| HermsError::not_found("node type", ns))?,
                ),
                rest,
            ),
            None => (node_type, name),
        };
        let candidates: Vec<NodeTypeId> = match node_type {
            Some(ty) => self.subtypes_of(ty),
            None => self.types.iter().map(|t| t.id).collect(),
        };
        let mut found: Option<(NodeTypeId, NodeId)> = None;
        for ty in candidates {
            if let Some(id) = self.type_nodes.get(ty.0).and_then(|idx| idx.by_name.get(name)) {
                if let Some((first, _)) = found {
                    return Err(HermsError::Ambiguous {
                        name: name.to_string(),
                        first: self.type_name(first).to_string(),
                        second: self.type_name(ty).to_string(),
                    });
                }
                found = Some((ty, *id));
            }
        }
        Ok(found.map(|(_, id)| id))
    }

    pub fn node_or_error(&self, name: &str, node_type: Option<NodeTypeId>) -> Result<NodeId> {
        self.node(name, node_type)?
            .ok_or_else(|| HermsError::not_found("node", name))
    }

    /// Nodes of exactly `ty`, in creation order.
    pub fn nodes(&self, ty: NodeTypeId) -> Vec<NodeId> {
        self.type_nodes
            .get(ty.0)
            .map(|idx| idx.order.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn nodes_iter(&self, ty: NodeTypeId) -> impl Iterator<Item = NodeId> + '_ {
        self.type_nodes
            .get(ty.0)
            .into_iter()
            .flat_map(|idx| idx.order.iter().copied())
    }

    pub(crate) fn type_count(&self, ty: NodeTypeId) -> usize {
        self.type_nodes.get(ty.0).map(|idx| idx.order.len()).unwrap_or(0)
    }

    /// Every node: type declaration order, then creation order.
    pub fn all_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.type_nodes
            .iter()
            .flat_map(|idx| idx.order.iter().copied())
    }

    /// Nodes currently in `state`, in creation order.
    pub fn state_members(&self, state: StateId) -> impl Iterator<Item = NodeId> + '_ {
        self.state_nodes
            .get(&state)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    pub(crate) fn state_count(&self, state: StateId) -> usize {
        self.state_nodes.get(&state).map(BTreeSet::len).unwrap_or(0)
    }

    /// Nodes whose flat tag list holds exactly `tag`, in creation order.
    pub fn tag_members(&self, tag: TagId) -> impl Iterator<Item = NodeId> + '_ {
        self.tag_nodes
            .get(&tag)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    pub(crate) fn tag_count(&self, tag: TagId) -> usize {
        self.tag_nodes.get(&tag).map(BTreeSet::len).unwrap_or(0)
    }

    //
    // Queries
    //

    /// Parse, bind and compile `text`. The result is always enumerable:
    /// predicate-only queries are wrapped in a scan over every node.
    pub fn query(&self, text: &str) -> Result<Box<dyn Executor + '_>> {
        let query = Query::new(text, self)?;
        self.execute(&query)
    }

    /// Compile an already parsed query into an enumerable executor.
    pub fn execute(&self, query: &Query) -> Result<Box<dyn Executor + '_>> {
        let backend = RepositoryBackend::new(self);
        let exec = match query.expression() {
            Some(expr) => compile(expr, &backend)?,
            None => compile(&query.bind(self)?, &backend)?,
        };
        if exec.is_iterable() {
            Ok(exec)
        } else {
            Ok(Box::new(AndExecutor::new(
                Box::new(AllExecutor::new(self)),
                vec![exec],
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> RepositoryConfig {
        serde_json::from_value(json!({
            "tags": {"tagcat": {"children": ["t1", "t2"]}},
            "types": {
                "base": {"properties": {"label": "string"}},
                "derived": {"base": "base", "properties": {"ref": "other", "cat": "tagcat"}},
                "other": {"properties": {"val": {"type": "int", "default": 1}}}
            },
            "states": {
                "s1": {"transitions": {"s2": "val>0"}},
                "s2": "second"
            },
            "nodes": {
                "other": {"o1": {"state": "s1"}, "dup": {}},
                "derived": {"d1": {"properties": {"ref": "o1", "cat": "t1"}}, "dup": {}}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_configure_resolves_forward_references() {
        let mut repo = Repository::new();
        repo.configure(&config()).unwrap();

        let derived = repo.node_type_id("derived").unwrap();
        let other = repo.node_type_id("other").unwrap();
        let base = repo.node_type_id("base").unwrap();
        assert_eq!(repo.ancestors(derived), vec![derived, base]);
        assert!(repo.is_subtype(derived, base));
        assert_eq!(repo.subtypes_of(base), vec![base, derived]);
        assert_eq!(
            repo.find_property(derived, "ref").unwrap().data_type,
            DataType::Node(Some(other))
        );
        assert!(repo.find_property(derived, "label").is_some());
        assert!(matches!(
            repo.find_property(derived, "cat").unwrap().data_type,
            DataType::Tag(Some(_))
        ));

        let s1 = repo.state_by_name("s1").unwrap();
        assert_eq!(s1.transitions.len(), 1);
        assert!(s1.transitions[0].auto);
        assert_eq!(repo.state_by_name("s2").unwrap().description, "second");
        assert_eq!(repo.node_count(), 4);
    }

    #[test]
    fn test_ambiguous_node_name() {
        let mut repo = Repository::new();
        repo.configure(&config()).unwrap();
        let err = repo.node("dup", None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "dup: ambiguous name (in derived and other)"
        );
        let other = repo.node_type_id("other").unwrap();
        assert!(repo.node("dup", Some(other)).unwrap().is_some());
        assert!(repo.node("other:dup", None).unwrap().is_some());
        assert!(repo.node("nobody", None).unwrap().is_none());
        assert!(repo.node("missing:x", None).is_err());
    }

    #[test]
    fn test_base_cycle_rejected() {
        let mut repo = Repository::new();
        let cfg: RepositoryConfig = serde_json::from_value(json!({
            "types": {"a": {"base": "b"}, "b": {"base": "a"}}
        }))
        .unwrap();
        assert!(matches!(repo.configure(&cfg), Err(HermsError::Schema(_))));
        // a half-configured chain still terminates
        let a = repo.node_type_id("a").unwrap();
        assert_eq!(repo.ancestors(a).len(), 2);
    }

    #[test]
    fn test_unknown_references_are_schema_errors() {
        let cases = vec![
            json!({"types": {"a": {"base": "zz"}}}),
            json!({"types": {"a": {"properties": {"p": "nosuchtype"}}}}),
            json!({"states": {"s1": {"transitions": {"s9": true}}}}),
            json!({"states": {"s1": {"services": {"on": "nosvc"}}}}),
            json!({"nodes": {"notype": {"n": {}}}}),
        ];
        for case in cases {
            let cfg: RepositoryConfig = serde_json::from_value(case.clone()).unwrap();
            let mut repo = Repository::new();
            assert!(
                matches!(repo.configure(&cfg), Err(HermsError::Schema(_))),
                "{} should fail",
                case
            );
        }
    }

    #[test]
    fn test_resolve_type_order() {
        let mut repo = Repository::new();
        repo.configure(&config()).unwrap();
        assert_eq!(
            repo.resolve_type("float").unwrap(),
            DataType::Primitive(Primitive::Number)
        );
        assert_eq!(repo.resolve_type("tag").unwrap(), DataType::Tag(None));
        assert_eq!(repo.resolve_type("node").unwrap(), DataType::Node(None));
        assert!(repo.resolve_type("date").is_err());
    }
}
