use anyhow::Result;
use serde_json::{json, Value as Json};

use crate::logic::StateCandidate;
use crate::model::{NodeId, SharedRepository};

/// Sub-state every service supports unless it says otherwise.
pub const ACTIVE: &str = "active";

/// A collaborator driven by the convergence engine.
///
/// Services get the shared repository and must not hold its lock across an
/// `.await`. Every call may fail; the engine treats a failing or timed-out
/// call as "nothing accepted / nothing modified" for that round.
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    /// Called once when the engine starts.
    async fn init(&self, _repo: &SharedRepository) -> Result<()> {
        Ok(())
    }

    /// Called once when the engine stops.
    async fn close(&self, _repo: &SharedRepository) -> Result<()> {
        Ok(())
    }

    /// Do this service's work for `nodes` (every node when empty) and
    /// report the nodes it modified.
    async fn update(&self, _repo: &SharedRepository, _nodes: &[NodeId]) -> Result<Vec<NodeId>> {
        Ok(Vec::new())
    }

    /// Phase one of a state change: return the candidate nodes this service
    /// accepts. Must not have side effects.
    async fn prepare_state(
        &self,
        _repo: &SharedRepository,
        candidates: &[StateCandidate],
    ) -> Result<Vec<NodeId>> {
        Ok(candidates.iter().map(|c| c.node).collect())
    }

    /// Phase two: the candidates every service accepted, already applied to
    /// the repository.
    async fn commit_state(
        &self,
        _repo: &SharedRepository,
        _accepted: &[StateCandidate],
    ) -> Result<()> {
        Ok(())
    }

    /// Further nodes affected by a content change of `nodes`.
    async fn modified(&self, _repo: &SharedRepository, _nodes: &[NodeId]) -> Result<Vec<NodeId>> {
        Ok(Vec::new())
    }

    /// JSON schema of the per-node configuration this service reads.
    fn node_config_schema(&self) -> Json {
        json!({"type": "object"})
    }

    fn supported_states(&self) -> Vec<String> {
        vec![ACTIVE.to_string()]
    }
}
