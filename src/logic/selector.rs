use serde_json::{Map, Value as Json};

use crate::error::Result;
use crate::logic::{Executor, Query, QueryBackend};
use crate::model::{NodeId, Repository};

/// Ordered list of `(query, value)` pairs with a default. The first query
/// matching a node selects its value.
#[derive(Debug, Clone)]
pub struct QuerySelector<T> {
    entries: Vec<(Query, T)>,
    pub default: T,
}

impl<T: Clone> QuerySelector<T> {
    pub fn new(default: T) -> Self {
        Self {
            entries: Vec::new(),
            default,
        }
    }

    /// Build from a map of query text to value. The keys `""` and `"*"`
    /// replace the default.
    pub fn from_map(repo: &Repository, entries: &[(String, T)], default: T) -> Result<Self> {
        let mut selector = Self::new(default);
        for (key, value) in entries {
            if key.is_empty() || key == "*" {
                selector.default = value.clone();
            } else {
                selector
                    .entries
                    .push((Query::new(key, repo)?, value.clone()));
            }
        }
        Ok(selector)
    }

    /// Add a rule ahead of every existing one.
    pub fn add(&mut self, query: Query, value: T) {
        self.entries.insert(0, (query, value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn refresh(&mut self, repo: &Repository) -> Result<()> {
        for (query, _) in self.entries.iter_mut() {
            query.refresh(repo)?;
        }
        Ok(())
    }

    /// Compile every rule once for repeated selection.
    pub fn compile<'s, 'r>(
        &'s self,
        backend: &dyn QueryBackend<'r>,
    ) -> Result<CompiledSelector<'s, 'r, T>> {
        let rules = self
            .entries
            .iter()
            .map(|(query, value)| Ok((query.compile(backend)?, value)))
            .collect::<Result<Vec<_>>>()?;
        Ok(CompiledSelector {
            rules,
            default: &self.default,
        })
    }
}

impl QuerySelector<Json> {
    /// Selector from a JSON configuration value: an object maps query text
    /// to values, anything else (except `null`) is the default.
    pub fn from_json(repo: &Repository, config: &Json, default: Json) -> Result<Self> {
        match config {
            Json::Object(map) => Self::from_map(repo, &entries_of(map), default),
            Json::Null => Ok(Self::new(default)),
            other => Ok(Self::new(other.clone())),
        }
    }
}

fn entries_of(map: &Map<String, Json>) -> Vec<(String, Json)> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

pub struct CompiledSelector<'s, 'r, T> {
    rules: Vec<(Box<dyn Executor + 'r>, &'s T)>,
    default: &'s T,
}

impl<'s, 'r, T> CompiledSelector<'s, 'r, T> {
    pub fn select(&self, node: NodeId) -> &'s T {
        self.rules
            .iter()
            .find(|(exec, _)| exec.matches(node))
            .map(|(_, value)| *value)
            .unwrap_or(self.default)
    }
}
