use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{HermsError, Result};
use crate::logic::transition::{commit, next_state, QueryCache, StateCandidate};
use crate::model::{NodeId, SharedRepository, StateId};
use crate::store::{NodeStore, StoredNode};

/// A committed state change.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRecord {
    /// Engine run that performed the change.
    pub run: Uuid,
    pub node: NodeId,
    pub from: Option<StateId>,
    pub to: StateId,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
enum Call {
    Update,
    Modified,
}

impl Call {
    fn phase(self) -> &'static str {
        match self {
            Call::Update => "update",
            Call::Modified => "modified",
        }
    }
}

/// Drives services and state transitions to a fixed point.
pub struct Engine {
    repo: SharedRepository,
    config: EngineConfig,
    store: Option<Arc<dyn NodeStore>>,
    history: Mutex<Vec<TransitionRecord>>,
}

impl Engine {
    pub fn new(repo: SharedRepository, config: EngineConfig) -> Self {
        Self {
            repo,
            config,
            store: None,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Persist named nodes through `store` at the end of [`modified`](Self::modified).
    pub fn with_store(mut self, store: Arc<dyn NodeStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn repository(&self) -> &SharedRepository {
        &self.repo
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.service_timeout_ms)
    }

    /// Every committed transition so far, oldest first.
    pub fn history(&self) -> Vec<TransitionRecord> {
        self.history.lock().clone()
    }

    /// Initialise every service, in registration order.
    pub async fn init(&self) -> Result<()> {
        let services = self.repo.read().services();
        for (name, service) in services {
            debug!("Initialising service '{}'", name);
            service
                .init(&self.repo)
                .await
                .map_err(|source| HermsError::Service {
                    service: name.clone(),
                    source,
                })?;
        }
        info!("Engine initialised");
        Ok(())
    }

    /// Close every service. All are closed even if one fails; the first
    /// failure is returned.
    pub async fn close(&self) -> Result<()> {
        let services = self.repo.read().services();
        let mut first = None;
        for (name, service) in services {
            if let Err(source) = service.close(&self.repo).await {
                warn!("Service '{}' failed to close: {:#}", name, source);
                first.get_or_insert(HermsError::Service {
                    service: name,
                    source,
                });
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run every service's `update` over `nodes` (every node when empty),
    /// then over what they modified, until a round modifies nothing.
    /// Returns every node modified along the way.
    pub async fn update(&self, nodes: &[NodeId]) -> Result<Vec<NodeId>> {
        let run = Uuid::new_v4();
        info!("Update run {} started with {} node(s)", run, nodes.len());
        let mut modified = BTreeSet::new();
        let mut pending = nodes.to_vec();
        for round in 1..=self.config.max_rounds {
            let changed = self.call_all(Call::Update, &pending).await;
            debug!("Update run {} round {}: {} modified", run, round, changed.len());
            if changed.is_empty() {
                info!("Update run {} converged after {} round(s)", run, round);
                return Ok(modified.into_iter().collect());
            }
            modified.extend(changed.iter().copied());
            pending = changed.into_iter().collect();
        }
        Err(HermsError::NonTermination {
            phase: Call::Update.phase(),
            rounds: self.config.max_rounds,
        })
    }

    /// Move nodes along their state graph. A target of `None` takes the
    /// first automatic transition whose guard matches. Runs one two-phase
    /// commit and returns the nodes whose state changed. A node whose guard
    /// fails to compile is logged and left where it is.
    pub async fn state(&self, targets: &[(NodeId, Option<StateId>)]) -> Result<Vec<NodeId>> {
        self.transition(Uuid::new_v4(), targets).await
    }

    async fn transition(
        &self,
        run: Uuid,
        targets: &[(NodeId, Option<StateId>)],
    ) -> Result<Vec<NodeId>> {
        let candidates = {
            let repo = self.repo.read();
            let mut cache = QueryCache::new(&repo);
            let mut candidates = Vec::new();
            for (node, target) in targets {
                match next_state(&repo, &mut cache, *node, *target) {
                    Ok(Some(candidate)) => candidates.push(candidate),
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Node {} skipped in run {}: {}", repo.node_label(*node), run, e)
                    }
                }
            }
            candidates
        };
        let applied = commit(&self.repo, candidates, self.timeout()).await?;
        self.record(run, &applied);
        Ok(applied.into_iter().map(|c| c.node).collect())
    }

    fn record(&self, run: Uuid, applied: &[StateCandidate]) {
        let at = Utc::now();
        let mut history = self.history.lock();
        for candidate in applied {
            history.push(TransitionRecord {
                run,
                node: candidate.node,
                from: candidate.from,
                to: candidate.to,
                at,
            });
        }
    }

    /// Propagate a content change of `nodes`: collect what services
    /// consider affected, take automatic transitions over the accumulated
    /// set, and repeat with the newly affected and transitioned nodes until
    /// a round yields nothing. Finally saves `nodes` to the store. Returns
    /// every affected or transitioned node.
    pub async fn modified(&self, nodes: &[NodeId]) -> Result<Vec<NodeId>> {
        let run = Uuid::new_v4();
        info!("Modification run {} started with {} node(s)", run, nodes.len());
        let mut touched = BTreeSet::new();
        // a node is reported as affected once per run
        let mut seen: BTreeSet<NodeId> = nodes.iter().copied().collect();
        let mut pending = seen.clone();
        let mut converged = false;
        for round in 1..=self.config.max_rounds {
            let batch: Vec<NodeId> = pending.iter().copied().collect();
            let affected = self.call_all(Call::Modified, &batch).await;

            let targets: Vec<(NodeId, Option<StateId>)> = pending
                .union(&affected)
                .map(|n| (*n, None))
                .collect();
            let moved = self.transition(run, &targets).await?;
            debug!(
                "Modification run {} round {}: {} affected, {} transitioned",
                run,
                round,
                affected.len(),
                moved.len()
            );

            let next: BTreeSet<NodeId> = affected
                .into_iter()
                .filter(|n| seen.insert(*n))
                .chain(moved)
                .collect();
            if next.is_empty() {
                info!("Modification run {} converged after {} round(s)", run, round);
                converged = true;
                break;
            }
            touched.extend(next.iter().copied());
            pending = next;
        }
        if !converged {
            return Err(HermsError::NonTermination {
                phase: Call::Modified.phase(),
                rounds: self.config.max_rounds,
            });
        }
        self.persist(nodes).await?;
        Ok(touched.into_iter().collect())
    }

    async fn persist(&self, nodes: &[NodeId]) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let dumps = {
            let repo = self.repo.read();
            let mut dumps = Vec::with_capacity(nodes.len());
            for id in nodes {
                let Some(node) = repo.get_node(*id) else {
                    continue;
                };
                dumps.push(StoredNode {
                    node_type: repo.type_name(node.node_type).to_string(),
                    name: node.name.clone(),
                    config: repo.dump_node(*id)?,
                });
            }
            dumps
        };
        store
            .save_nodes(&dumps)
            .await
            .map_err(|source| HermsError::Service {
                service: "store".to_string(),
                source,
            })?;
        debug!("Saved {} node(s)", dumps.len());
        Ok(())
    }

    /// Call every service concurrently and union the nodes they report.
    /// Failing or timed-out services report nothing.
    async fn call_all(&self, call: Call, nodes: &[NodeId]) -> BTreeSet<NodeId> {
        let services = self.repo.read().services();
        let timeout = self.timeout();
        let mut calls = JoinSet::new();
        for (name, service) in services {
            let repo = self.repo.clone();
            let nodes = nodes.to_vec();
            calls.spawn(async move {
                let result = match call {
                    Call::Update => tokio::time::timeout(timeout, service.update(&repo, &nodes)).await,
                    Call::Modified => {
                        tokio::time::timeout(timeout, service.modified(&repo, &nodes)).await
                    }
                };
                (name, result)
            });
        }
        let mut union = BTreeSet::new();
        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok((_, Ok(Ok(reported)))) => union.extend(reported),
                Ok((name, Ok(Err(e)))) => {
                    warn!("Service '{}' failed in {}: {:#}", name, call.phase(), e)
                }
                Ok((name, Err(_))) => warn!("Service '{}' timed out in {}", name, call.phase()),
                Err(e) => warn!("Service task aborted in {}: {}", call.phase(), e),
            }
        }
        union
    }
}
