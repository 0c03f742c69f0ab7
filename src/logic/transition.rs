use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::task::JoinSet;

use crate::error::{HermsError, Result};
use crate::logic::{Executor, RepositoryBackend};
use crate::model::{NodeId, Repository, SharedRepository, StateId, Transition};

/// A proposed state change, as seen by one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateCandidate {
    pub node: NodeId,
    pub from: Option<StateId>,
    pub to: StateId,
    /// The target state's label for the receiving service, if it has one.
    pub sub_state: Option<String>,
}

/// Compiled transition guards, kept for one round.
pub struct QueryCache<'r> {
    backend: RepositoryBackend<'r>,
    guards: HashMap<(StateId, StateId), Box<dyn Executor + 'r>>,
}

impl<'r> QueryCache<'r> {
    pub fn new(repo: &'r Repository) -> Self {
        Self {
            backend: RepositoryBackend::new(repo),
            guards: HashMap::new(),
        }
    }

    /// Whether `node` passes the guard of `transition`. Compiles the guard
    /// on first use.
    pub fn admits(&mut self, transition: &Transition, node: NodeId) -> Result<bool> {
        let key = (transition.from, transition.to);
        if !self.guards.contains_key(&key) {
            let exec = transition.guard.compile(&self.backend)?;
            self.guards.insert(key, exec);
        }
        Ok(self.guards.get(&key).map_or(false, |exec| exec.matches(node)))
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

/// Next state of `node`. Without a target the first automatic transition
/// whose guard matches is taken; with one, a transition to it must exist
/// and its guard must match. Nodes without a state have no transitions.
pub fn next_state(
    repo: &Repository,
    cache: &mut QueryCache<'_>,
    node: NodeId,
    target: Option<StateId>,
) -> Result<Option<StateCandidate>> {
    let current = repo
        .get_node(node)
        .ok_or_else(|| HermsError::not_found("node", format!("#{}", node.0)))?
        .state;
    let Some(state) = current.and_then(|s| repo.state(s)) else {
        return Ok(None);
    };
    for transition in &state.transitions {
        let wanted = match target {
            Some(to) => transition.to == to,
            None => transition.auto,
        };
        if wanted && cache.admits(transition, node)? {
            return Ok(Some(StateCandidate {
                node,
                from: current,
                to: transition.to,
                sub_state: None,
            }));
        }
    }
    Ok(None)
}

/// Candidates labelled with the sub-state each target state declares for
/// `service`.
fn for_service(repo: &Repository, service: &str, candidates: &[StateCandidate]) -> Vec<StateCandidate> {
    candidates
        .iter()
        .map(|c| StateCandidate {
            sub_state: repo
                .state(c.to)
                .and_then(|s| s.service_label(service))
                .map(str::to_string),
            ..c.clone()
        })
        .collect()
}

/// Commit a batch of state changes across every registered service.
///
/// Phase one asks each service, concurrently, which candidates it accepts;
/// a service that fails or exceeds `timeout` accepts nothing. Candidates
/// accepted by all services are applied to the repository, then phase two
/// hands each service the applied set. Returns the applied candidates.
pub async fn commit(
    repo: &SharedRepository,
    candidates: Vec<StateCandidate>,
    timeout: Duration,
) -> Result<Vec<StateCandidate>> {
    if candidates.is_empty() {
        return Ok(candidates);
    }
    let (services, batches) = {
        let guard = repo.read();
        let services = guard.services();
        let batches: Vec<Vec<StateCandidate>> = services
            .iter()
            .map(|(name, _)| for_service(&guard, name, &candidates))
            .collect();
        (services, batches)
    };

    let mut accepted: BTreeSet<NodeId> = candidates.iter().map(|c| c.node).collect();
    let mut phase_one = JoinSet::new();
    for ((name, service), batch) in services.iter().cloned().zip(batches.iter().cloned()) {
        let repo = repo.clone();
        phase_one.spawn(async move {
            let result = tokio::time::timeout(timeout, service.prepare_state(&repo, &batch)).await;
            (name, result)
        });
    }
    while let Some(joined) = phase_one.join_next().await {
        match joined {
            Ok((_, Ok(Ok(nodes)))) => {
                let nodes: BTreeSet<NodeId> = nodes.into_iter().collect();
                accepted.retain(|n| nodes.contains(n));
            }
            Ok((name, Ok(Err(e)))) => {
                warn!("Service '{}' failed to prepare state change: {:#}", name, e);
                accepted.clear();
            }
            Ok((name, Err(_))) => {
                warn!("Service '{}' timed out preparing state change", name);
                accepted.clear();
            }
            Err(e) => {
                warn!("State preparation task aborted: {}", e);
                accepted.clear();
            }
        }
    }
    if accepted.is_empty() {
        info!("No state change accepted by every service ({} proposed)", candidates.len());
        return Ok(Vec::new());
    }

    let applied: Vec<StateCandidate> = {
        let mut guard = repo.write();
        let mut applied = Vec::new();
        for candidate in candidates.into_iter().filter(|c| accepted.contains(&c.node)) {
            // skip nodes moved by someone else since the candidate was built
            if guard.get_node(candidate.node).map(|n| n.state) != Some(candidate.from) {
                debug!("Node #{} changed state during commit, skipped", candidate.node.0);
                continue;
            }
            guard.set_state(candidate.node, Some(candidate.to))?;
            applied.push(candidate);
        }
        applied
    };
    if applied.is_empty() {
        return Ok(applied);
    }

    let mut phase_two = JoinSet::new();
    for ((name, service), batch) in services.into_iter().zip(batches) {
        let repo = repo.clone();
        let batch: Vec<StateCandidate> = batch
            .into_iter()
            .filter(|c| applied.iter().any(|a| a.node == c.node))
            .collect();
        phase_two.spawn(async move {
            let result = tokio::time::timeout(timeout, service.commit_state(&repo, &batch)).await;
            (name, result)
        });
    }
    while let Some(joined) = phase_two.join_next().await {
        match joined {
            Ok((_, Ok(Ok(())))) => {}
            Ok((name, Ok(Err(e)))) => {
                warn!("Service '{}' failed to commit state change: {:#}", name, e)
            }
            Ok((name, Err(_))) => warn!("Service '{}' timed out committing state change", name),
            Err(e) => warn!("State commit task aborted: {}", e),
        }
    }
    info!("Committed {} state change(s)", applied.len());
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RepositoryConfig;
    use serde_json::json;

    fn repo() -> Repository {
        let cfg: RepositoryConfig = serde_json::from_value(json!({
            "types": {"job": {"properties": {"ready": "bool"}}},
            "states": {
                "new": {"transitions": {"manual": null, "running": "ready=true"}},
                "running": {"transitions": {"done": false}},
                "manual": {},
                "done": {}
            },
            "nodes": {"job": {
                "j1": {"state": "new", "properties": {"ready": true}},
                "j2": {"state": "new", "properties": {"ready": false}},
                "j3": {}
            }}
        }))
        .unwrap();
        let mut repo = Repository::new();
        repo.configure(&cfg).unwrap();
        repo
    }

    #[test]
    fn test_automatic_transition_follows_guard() {
        let repo = repo();
        let mut cache = QueryCache::new(&repo);
        let j1 = repo.node_or_error("j1", None).unwrap();
        let j2 = repo.node_or_error("j2", None).unwrap();
        let j3 = repo.node_or_error("j3", None).unwrap();

        let next = next_state(&repo, &mut cache, j1, None).unwrap().unwrap();
        assert_eq!(next.to, repo.state_id("running").unwrap());
        assert_eq!(next.from, repo.state_id("new"));
        assert!(next_state(&repo, &mut cache, j2, None).unwrap().is_none());
        assert!(next_state(&repo, &mut cache, j3, None).unwrap().is_none());
        // one guard compiled, reused for j2
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_explicit_target_needs_a_transition() {
        let repo = repo();
        let mut cache = QueryCache::new(&repo);
        let j2 = repo.node_or_error("j2", None).unwrap();
        let manual = repo.state_id("manual").unwrap();
        let done = repo.state_id("done").unwrap();
        let running = repo.state_id("running").unwrap();

        assert_eq!(
            next_state(&repo, &mut cache, j2, Some(manual)).unwrap().map(|c| c.to),
            Some(manual)
        );
        assert!(next_state(&repo, &mut cache, j2, Some(done)).unwrap().is_none());
        // guard fails for j2
        assert!(next_state(&repo, &mut cache, j2, Some(running)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_without_services_applies_everything() {
        let shared = repo().into_shared();
        let (j1, running) = {
            let repo = shared.read();
            (repo.node_or_error("j1", None).unwrap(), repo.state_id("running").unwrap())
        };
        let candidate = StateCandidate {
            node: j1,
            from: shared.read().state_id("new"),
            to: running,
            sub_state: None,
        };
        let applied = commit(&shared, vec![candidate], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(shared.read().get_node(j1).unwrap().state, Some(running));
    }
}
