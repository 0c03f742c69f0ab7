use log::debug;

use crate::error::{HermsError, Result};
use crate::logic::executor::{
    AllExecutor, AndExecutor, ApplyExecutor, EmptyExecutor, Executor, NodeExecutor,
    NodeTypeExecutor, NotExecutor, OrExecutor, RelExecutor, StateExecutor, TagExecutor,
};
use crate::model::{ApplyExpr, Expression, NameRef, NodeTypeId, RelExpr, Repository, StateId};

/// Supplies the leaf executors a bound expression compiles into.
pub trait QueryBackend<'r> {
    fn repository(&self) -> &'r Repository;

    fn all(&self) -> Box<dyn Executor + 'r>;

    fn node_type(&self, id: NodeTypeId) -> Result<Box<dyn Executor + 'r>>;

    fn state(&self, id: StateId) -> Result<Box<dyn Executor + 'r>>;

    /// Resolve a node or tag name.
    fn name(&self, name: &NameRef) -> Result<Box<dyn Executor + 'r>>;

    fn relation(&self, rel: &RelExpr) -> Result<Box<dyn Executor + 'r>>;

    fn apply(
        &self,
        apply: &ApplyExpr,
        condition: Box<dyn Executor + 'r>,
    ) -> Result<Box<dyn Executor + 'r>>;
}

/// Backend evaluating directly against the in-memory repository.
pub struct RepositoryBackend<'r> {
    repo: &'r Repository,
}

impl<'r> RepositoryBackend<'r> {
    pub fn new(repo: &'r Repository) -> Self {
        Self { repo }
    }
}

impl<'r> QueryBackend<'r> for RepositoryBackend<'r> {
    fn repository(&self) -> &'r Repository {
        self.repo
    }

    fn all(&self) -> Box<dyn Executor + 'r> {
        Box::new(AllExecutor::new(self.repo))
    }

    fn node_type(&self, id: NodeTypeId) -> Result<Box<dyn Executor + 'r>> {
        if self.repo.node_type(id).is_none() {
            return Err(HermsError::query(format!("unknown node type #{}", id.0)));
        }
        Ok(Box::new(NodeTypeExecutor::new(self.repo, id)))
    }

    fn state(&self, id: StateId) -> Result<Box<dyn Executor + 'r>> {
        if self.repo.state(id).is_none() {
            return Err(HermsError::query(format!("unknown state #{}", id.0)));
        }
        Ok(Box::new(StateExecutor::new(self.repo, id)))
    }

    fn name(&self, name: &NameRef) -> Result<Box<dyn Executor + 'r>> {
        match name {
            NameRef::Qualified { ns, name: n, .. } => match self.repo.node(n, Some(*ns))? {
                Some(node) => Ok(Box::new(NodeExecutor::new(node))),
                None => Err(HermsError::query(format!("{}: no such node", name))),
            },
            NameRef::Dotted(parts) => match self.repo.tag(&parts.join(".")) {
                Some(tag) => Ok(Box::new(TagExecutor::new(self.repo, tag))),
                None => Err(HermsError::query(format!("{}: no tag found", name))),
            },
            NameRef::Bare(n) => {
                if let Some(node) = self.repo.node(n, None)? {
                    Ok(Box::new(NodeExecutor::new(node)))
                } else if let Some(state) = self.repo.state_id(n) {
                    Ok(Box::new(StateExecutor::new(self.repo, state)))
                } else if let Some(tag) = self.repo.tag(n) {
                    Ok(Box::new(TagExecutor::new(self.repo, tag)))
                } else {
                    Err(HermsError::query(format!(
                        "{}: no node, state or tag by that name",
                        n
                    )))
                }
            }
        }
    }

    fn relation(&self, rel: &RelExpr) -> Result<Box<dyn Executor + 'r>> {
        Ok(Box::new(RelExecutor::new(
            self.repo,
            rel.props.clone(),
            rel.op,
            rel.operands.clone(),
        )))
    }

    fn apply(
        &self,
        apply: &ApplyExpr,
        condition: Box<dyn Executor + 'r>,
    ) -> Result<Box<dyn Executor + 'r>> {
        Ok(Box::new(ApplyExecutor::new(
            self.repo,
            apply.props.clone(),
            apply.mode,
            condition,
        )))
    }
}

/// Compile a bound expression. Every name is resolved before anything is
/// returned, so a failing compile has scanned no node.
pub fn compile<'r>(
    expr: &Expression,
    backend: &dyn QueryBackend<'r>,
) -> Result<Box<dyn Executor + 'r>> {
    match expr {
        Expression::All => Ok(backend.all()),
        Expression::Empty => Ok(Box::new(EmptyExecutor)),
        Expression::Not(inner) => Ok(Box::new(NotExecutor::new(compile(inner, backend)?))),
        Expression::And(args) => {
            let operands = compile_all(args, backend)?;
            if operands.is_empty() {
                return Ok(backend.all());
            }
            Ok(plan_and(operands))
        }
        Expression::Or(args) => {
            let operands = compile_all(args, backend)?;
            if operands.is_empty() {
                return Ok(Box::new(EmptyExecutor));
            }
            Ok(Box::new(OrExecutor::new(operands)))
        }
        Expression::NodeType { id, .. } => backend.node_type(*id),
        Expression::State { id, .. } => backend.state(*id),
        Expression::Name(name) => backend.name(name),
        Expression::Rel(rel) => backend.relation(rel),
        Expression::Apply(apply) => {
            let condition = compile(&apply.condition, backend)?;
            backend.apply(apply, condition)
        }
    }
}

fn compile_all<'r>(
    args: &[Expression],
    backend: &dyn QueryBackend<'r>,
) -> Result<Vec<Box<dyn Executor + 'r>>> {
    args.iter().map(|arg| compile(arg, backend)).collect()
}

/// Drive a conjunction from its smallest enumerable operand; the rest
/// filter, cheapest first. With no enumerable operand the first one leads
/// and the result is predicate-only.
pub fn plan_and<'r>(mut operands: Vec<Box<dyn Executor + 'r>>) -> Box<dyn Executor + 'r> {
    let primary = operands
        .iter()
        .enumerate()
        .filter(|(_, x)| x.is_iterable())
        .min_by_key(|(_, x)| x.len())
        .map(|(i, _)| i)
        .unwrap_or(0);
    let primary = operands.remove(primary);
    operands.sort_by_key(|x| x.len());
    debug!(
        "AND planned: primary len {} iterable {}, {} filter(s)",
        primary.len(),
        primary.is_iterable(),
        operands.len()
    );
    Box::new(AndExecutor::new(primary, operands))
}
