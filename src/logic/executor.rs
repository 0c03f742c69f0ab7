use itertools::Itertools;
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::logic::builder::decode_text;
use crate::logic::grammar::{Comparison, Match, RelOp};
use crate::logic::Props;
use crate::model::{DataType, NodeId, NodeTypeId, Operand, Repository, StateId, TagId, Value};

/// Cardinality estimate of an executor that cannot enumerate.
pub const UNBOUNDED: usize = usize::MAX;

/// A compiled query.
///
/// `matches` is always valid. `items` and `len` are only meaningful when
/// `is_iterable` returns true; `items` may be called repeatedly and restarts
/// each time.
pub trait Executor: Send + Sync {
    fn matches(&self, node: NodeId) -> bool;

    fn is_iterable(&self) -> bool {
        false
    }

    /// Upper bound of the number of matching nodes, or [`UNBOUNDED`].
    fn len(&self) -> usize {
        UNBOUNDED
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn items(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
        Box::new(std::iter::empty())
    }

    /// Enumerate into a vector.
    fn collect(&self) -> Vec<NodeId> {
        self.items().collect()
    }
}

/// Every node, in type declaration order then creation order.
pub struct AllExecutor<'r> {
    repo: &'r Repository,
}

impl<'r> AllExecutor<'r> {
    pub fn new(repo: &'r Repository) -> Self {
        Self { repo }
    }
}

impl<'r> Executor for AllExecutor<'r> {
    fn matches(&self, node: NodeId) -> bool {
        self.repo.get_node(node).is_some()
    }

    fn is_iterable(&self) -> bool {
        true
    }

    fn len(&self) -> usize {
        self.repo.node_count()
    }

    fn items(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
        Box::new(self.repo.all_nodes())
    }
}

pub struct EmptyExecutor;

impl Executor for EmptyExecutor {
    fn matches(&self, _: NodeId) -> bool {
        false
    }

    fn is_iterable(&self) -> bool {
        true
    }

    fn len(&self) -> usize {
        0
    }
}

/// Nodes of a type or any of its subtypes.
pub struct NodeTypeExecutor<'r> {
    repo: &'r Repository,
    types: Vec<NodeTypeId>,
}

impl<'r> NodeTypeExecutor<'r> {
    pub fn new(repo: &'r Repository, node_type: NodeTypeId) -> Self {
        Self {
            repo,
            types: repo.subtypes_of(node_type),
        }
    }
}

impl<'r> Executor for NodeTypeExecutor<'r> {
    fn matches(&self, node: NodeId) -> bool {
        self.repo
            .get_node(node)
            .map_or(false, |n| self.types.contains(&n.node_type))
    }

    fn is_iterable(&self) -> bool {
        true
    }

    fn len(&self) -> usize {
        self.types.iter().map(|t| self.repo.type_count(*t)).sum()
    }

    fn items(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
        Box::new(self.types.iter().flat_map(|t| self.repo.nodes_iter(*t)))
    }
}

/// A single named node.
pub struct NodeExecutor {
    node: NodeId,
}

impl NodeExecutor {
    pub fn new(node: NodeId) -> Self {
        Self { node }
    }
}

impl Executor for NodeExecutor {
    fn matches(&self, node: NodeId) -> bool {
        node == self.node
    }

    fn is_iterable(&self) -> bool {
        true
    }

    fn len(&self) -> usize {
        1
    }

    fn items(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
        Box::new(std::iter::once(self.node))
    }
}

pub struct StateExecutor<'r> {
    repo: &'r Repository,
    state: StateId,
}

impl<'r> StateExecutor<'r> {
    pub fn new(repo: &'r Repository, state: StateId) -> Self {
        Self { repo, state }
    }
}

impl<'r> Executor for StateExecutor<'r> {
    fn matches(&self, node: NodeId) -> bool {
        self.repo
            .get_node(node)
            .map_or(false, |n| n.state == Some(self.state))
    }

    fn is_iterable(&self) -> bool {
        true
    }

    fn len(&self) -> usize {
        self.repo.state_count(self.state)
    }

    fn items(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
        Box::new(self.repo.state_members(self.state))
    }
}

/// Nodes carrying a tag that is-a the target tag.
pub struct TagExecutor<'r> {
    repo: &'r Repository,
    tag: TagId,
    subtree: Vec<TagId>,
}

impl<'r> TagExecutor<'r> {
    pub fn new(repo: &'r Repository, tag: TagId) -> Self {
        Self {
            repo,
            tag,
            subtree: repo.tags().walk(tag),
        }
    }
}

impl<'r> Executor for TagExecutor<'r> {
    fn matches(&self, node: NodeId) -> bool {
        let forest = self.repo.tags();
        self.repo
            .get_node(node)
            .map_or(false, |n| n.tags.iter().any(|t| forest.isa(*t, self.tag)))
    }

    fn is_iterable(&self) -> bool {
        true
    }

    fn len(&self) -> usize {
        self.subtree.iter().map(|t| self.repo.tag_count(*t)).sum()
    }

    fn items(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
        let members: BTreeSet<NodeId> = self
            .subtree
            .iter()
            .flat_map(|t| self.repo.tag_members(*t))
            .collect();
        Box::new(members.into_iter())
    }
}

/// Enumerates `primary` and keeps the nodes every filter accepts.
pub struct AndExecutor<'r> {
    primary: Box<dyn Executor + 'r>,
    filters: Vec<Box<dyn Executor + 'r>>,
}

impl<'r> AndExecutor<'r> {
    pub fn new(primary: Box<dyn Executor + 'r>, filters: Vec<Box<dyn Executor + 'r>>) -> Self {
        Self { primary, filters }
    }

    fn filtered(&self, node: NodeId) -> bool {
        self.filters.iter().all(|f| f.matches(node))
    }
}

impl<'r> Executor for AndExecutor<'r> {
    fn matches(&self, node: NodeId) -> bool {
        self.primary.matches(node) && self.filtered(node)
    }

    fn is_iterable(&self) -> bool {
        self.primary.is_iterable()
    }

    fn len(&self) -> usize {
        self.primary.len()
    }

    fn items(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
        Box::new(self.primary.items().filter(move |n| self.filtered(*n)))
    }
}

/// Union of its operands. Enumerable only if every operand is.
pub struct OrExecutor<'r> {
    operands: Vec<Box<dyn Executor + 'r>>,
}

impl<'r> OrExecutor<'r> {
    pub fn new(operands: Vec<Box<dyn Executor + 'r>>) -> Self {
        Self { operands }
    }
}

impl<'r> Executor for OrExecutor<'r> {
    fn matches(&self, node: NodeId) -> bool {
        self.operands.iter().any(|x| x.matches(node))
    }

    fn is_iterable(&self) -> bool {
        self.operands.iter().all(|x| x.is_iterable())
    }

    fn len(&self) -> usize {
        if !self.is_iterable() {
            return UNBOUNDED;
        }
        self.operands
            .iter()
            .map(|x| x.len())
            .try_fold(0usize, |acc, n| {
                if n == UNBOUNDED {
                    None
                } else {
                    acc.checked_add(n)
                }
            })
            .unwrap_or(UNBOUNDED)
    }

    fn items(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
        Box::new(self.operands.iter().flat_map(|x| x.items()).unique())
    }
}

pub struct NotExecutor<'r> {
    inner: Box<dyn Executor + 'r>,
}

impl<'r> NotExecutor<'r> {
    pub fn new(inner: Box<dyn Executor + 'r>) -> Self {
        Self { inner }
    }
}

impl<'r> Executor for NotExecutor<'r> {
    fn matches(&self, node: NodeId) -> bool {
        !self.inner.matches(node)
    }
}

/// Relational condition over the values a property path yields.
pub struct RelExecutor<'r> {
    repo: &'r Repository,
    props: Props,
    op: RelOp,
    operands: Vec<Operand>,
}

impl<'r> RelExecutor<'r> {
    pub fn new(repo: &'r Repository, props: Props, op: RelOp, operands: Vec<Operand>) -> Self {
        Self {
            repo,
            props,
            op,
            operands,
        }
    }

    fn operand(&self, operand: &Operand, declared: &DataType) -> Option<Value> {
        match operand {
            Operand::Literal { value, .. } => Some(value.clone()),
            // undecodable for this branch's type: never equal, never ordered
            Operand::Deferred(text) => decode_text(self.repo, text, declared).ok(),
        }
    }

    fn test(&self, value: &Value, declared: &DataType) -> bool {
        match self.op.cmp {
            Comparison::Eq => self.operands.iter().any(|o| {
                self.operand(o, declared)
                    .map_or(false, |rhs| value.loose_eq(&rhs))
            }),
            Comparison::Ne => self.operands.iter().all(|o| {
                self.operand(o, declared)
                    .map_or(true, |rhs| !value.loose_eq(&rhs))
            }),
            cmp => {
                let Some(rhs) = self.operands.first().and_then(|o| self.operand(o, declared))
                else {
                    return false;
                };
                match value.compare(&rhs) {
                    Some(ordering) => match cmp {
                        Comparison::Lt => ordering == Ordering::Less,
                        Comparison::Le => ordering != Ordering::Greater,
                        Comparison::Gt => ordering == Ordering::Greater,
                        Comparison::Ge => ordering != Ordering::Less,
                        Comparison::Eq | Comparison::Ne => false,
                    },
                    None => false,
                }
            }
        }
    }
}

impl<'r> Executor for RelExecutor<'r> {
    fn matches(&self, node: NodeId) -> bool {
        let values = self.props.typed_values(self.repo, node);
        match self.op.effective_mode() {
            Match::All => values.iter().all(|(v, t)| self.test(v, t)),
            Match::Any => values.iter().any(|(v, t)| self.test(v, t)),
        }
    }
}

/// Applies an inner condition to the nodes reached through a path.
pub struct ApplyExecutor<'r> {
    repo: &'r Repository,
    props: Props,
    mode: Match,
    condition: Box<dyn Executor + 'r>,
}

impl<'r> ApplyExecutor<'r> {
    pub fn new(
        repo: &'r Repository,
        props: Props,
        mode: Match,
        condition: Box<dyn Executor + 'r>,
    ) -> Self {
        Self {
            repo,
            props,
            mode,
            condition,
        }
    }
}

impl<'r> Executor for ApplyExecutor<'r> {
    fn matches(&self, node: NodeId) -> bool {
        let related = self.props.nodes(self.repo, node);
        match self.mode {
            Match::All => related.iter().all(|n| self.condition.matches(*n)),
            Match::Any => related.iter().any(|n| self.condition.matches(*n)),
        }
    }
}
