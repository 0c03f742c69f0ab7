use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, HashMap};

use crate::error::{HermsError, Result};
use crate::logic::Query;
use crate::model::{Owned, StateId};

/// Lifecycle classification of a state. Recorded for the integrating
/// application; transitions are not restricted by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Initial,
    Final,
}

/// An outgoing edge of the state graph.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: StateId,
    pub to: StateId,
    /// Taken without an explicit request when the guard matches.
    pub auto: bool,
    pub guard: Query,
}

#[derive(Debug, Clone)]
pub struct State {
    pub name: String,
    pub id: StateId,
    pub description: String,
    pub lifecycle: Option<Lifecycle>,
    /// Nodes failing this condition are not considered to be in the state.
    /// Evaluated by callers; the repository does not enforce it.
    pub condition: Query,
    /// Outgoing transitions in precedence order.
    pub transitions: Vec<Transition>,
    /// Service name to the service-local sub-state label.
    pub services: HashMap<String, String>,
}

impl State {
    pub fn new() -> Self {
        Self {
            name: String::new(),
            id: StateId(0),
            description: String::new(),
            lifecycle: None,
            condition: Query::default(),
            transitions: Vec::new(),
            services: HashMap::new(),
        }
    }

    pub fn transition_to(&self, to: StateId) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.to == to)
    }

    pub fn service_label(&self, service: &str) -> Option<&str> {
        self.services.get(service).map(String::as_str)
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl Owned for State {
    type Owner = ();

    fn assign(&mut self, _: (), name: &str, slot: usize) {
        self.name = name.to_string();
        self.id = StateId(slot);
    }
}

/// Transition as written in configuration.
///
/// `true`/`false` set `auto` with no guard, a string is an automatic
/// transition guarded by that query, `null` is a manual transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransitionConfig {
    Auto(bool),
    Guarded(String),
    Full {
        #[serde(default)]
        auto: bool,
        #[serde(default)]
        condition: String,
    },
}

impl TransitionConfig {
    /// `(auto, guard text)` for an optional configuration entry.
    pub fn parts(config: Option<&TransitionConfig>) -> (bool, &str) {
        match config {
            None => (false, ""),
            Some(TransitionConfig::Auto(auto)) => (*auto, ""),
            Some(TransitionConfig::Guarded(guard)) => (true, guard.as_str()),
            Some(TransitionConfig::Full { auto, condition }) => (*auto, condition.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn names(&self) -> Vec<&str> {
        match self {
            OneOrMany::One(name) => vec![name.as_str()],
            OneOrMany::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

/// Sub-state labels per service: one label for every service, or a map from
/// label to the service(s) it applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceStateConfig {
    All(String),
    ByLabel(BTreeMap<String, OneOrMany>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub lifecycle: Option<Lifecycle>,
    #[serde(default)]
    pub condition: String,
    /// Target state name to transition configuration, in precedence order.
    #[serde(default)]
    pub transitions: Map<String, Json>,
    #[serde(default)]
    pub services: Option<ServiceStateConfig>,
}

impl StateConfig {
    /// Parse a state entry: `null`, a description string, or a full object.
    pub fn from_json(data: &Json) -> Result<Self> {
        match data {
            Json::Null => Ok(Self::default()),
            Json::String(description) => Ok(Self {
                description: description.clone(),
                ..Self::default()
            }),
            other => serde_json::from_value(other.clone())
                .map_err(|e| HermsError::schema(format!("state configuration: {}", e))),
        }
    }

    pub fn transition_configs(&self) -> Result<Vec<(String, Option<TransitionConfig>)>> {
        self.transitions
            .iter()
            .map(|(to, raw)| {
                let cfg = match raw {
                    Json::Null => None,
                    other => Some(serde_json::from_value(other.clone()).map_err(|e| {
                        HermsError::schema(format!("transition to '{}': {}", to, e))
                    })?),
                };
                Ok((to.clone(), cfg))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_config_forms() {
        assert_eq!(
            StateConfig::from_json(&json!("waiting")).unwrap().description,
            "waiting"
        );
        assert_eq!(StateConfig::from_json(&json!(null)).unwrap(), StateConfig::default());

        let cfg = StateConfig::from_json(&json!({
            "lifecycle": "initial",
            "condition": "type1",
            "transitions": {
                "s2": true,
                "s3": "val>4",
                "s4": null,
                "s5": {"auto": false, "condition": "tag1"}
            },
            "services": {"running": ["svc1", "svc2"], "idle": "svc3"}
        }))
        .unwrap();
        assert_eq!(cfg.lifecycle, Some(Lifecycle::Initial));

        let transitions = cfg.transition_configs().unwrap();
        let parts: Vec<(&str, bool, &str)> = transitions
            .iter()
            .map(|(to, c)| {
                let (auto, guard) = TransitionConfig::parts(c.as_ref());
                (to.as_str(), auto, guard)
            })
            .collect();
        assert_eq!(
            parts,
            vec![
                ("s2", true, ""),
                ("s3", true, "val>4"),
                ("s4", false, ""),
                ("s5", false, "tag1")
            ]
        );

        match cfg.services.unwrap() {
            ServiceStateConfig::ByLabel(map) => {
                assert_eq!(map["running"].names(), vec!["svc1", "svc2"]);
                assert_eq!(map["idle"].names(), vec!["svc3"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
