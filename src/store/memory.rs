use anyhow::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::store::{NodeStore, StoredNode};

/// In-process node store keyed by `type:name`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    nodes: RwLock<BTreeMap<String, StoredNode>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save_nodes` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

#[async_trait::async_trait]
impl NodeStore for MemoryStore {
    async fn save_nodes(&self, nodes: &[StoredNode]) -> Result<()> {
        let mut stored = self.nodes.write();
        for node in nodes {
            stored.insert(node.key(), node.clone());
        }
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn load_node(&self, node_type: &str, name: &str) -> Result<Option<StoredNode>> {
        Ok(self
            .nodes
            .read()
            .get(&format!("{}:{}", node_type, name))
            .cloned())
    }

    async fn list_nodes(&self) -> Result<Vec<StoredNode>> {
        Ok(self.nodes.read().values().cloned().collect())
    }

    async fn delete_node(&self, node_type: &str, name: &str) -> Result<bool> {
        Ok(self
            .nodes
            .write()
            .remove(&format!("{}:{}", node_type, name))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeConfig;

    fn stored(name: &str) -> StoredNode {
        StoredNode {
            node_type: "job".to_string(),
            name: name.to_string(),
            config: NodeConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_save_overwrites_by_key() {
        let store = MemoryStore::new();
        store.save_nodes(&[stored("a"), stored("b")]).await.unwrap();
        let mut again = stored("a");
        again.config.description = "second".to_string();
        store.save_nodes(&[again]).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.save_count(), 2);
        let loaded = store.load_node("job", "a").await.unwrap().unwrap();
        assert_eq!(loaded.config.description, "second");
        assert!(store.delete_node("job", "b").await.unwrap());
        assert!(!store.delete_node("job", "b").await.unwrap());
        assert_eq!(store.list_nodes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_count_is_shared_across_tasks() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let store = store.clone();
            tasks.spawn(async move { store.save_nodes(&[stored(&format!("n{}", i))]).await });
        }
        while let Some(done) = tasks.join_next().await {
            done.unwrap().unwrap();
        }
        assert_eq!(store.save_count(), 8);
        assert_eq!(store.len(), 8);
    }
}
