use crate::model::NodeConfig;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A node as persisted: its identity plus its dumped configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNode {
    pub node_type: String,
    pub name: String,
    pub config: NodeConfig,
}

impl StoredNode {
    /// `type:name` key.
    pub fn key(&self) -> String {
        format!("{}:{}", self.node_type, self.name)
    }
}

#[async_trait::async_trait]
pub trait NodeStore: Send + Sync {
    async fn save_nodes(&self, nodes: &[StoredNode]) -> Result<()>;
    async fn load_node(&self, node_type: &str, name: &str) -> Result<Option<StoredNode>>;
    async fn list_nodes(&self) -> Result<Vec<StoredNode>>;
    async fn delete_node(&self, node_type: &str, name: &str) -> Result<bool>;
}
