use std::fmt;

use crate::error::Result;
use crate::logic::builder::build;
use crate::logic::grammar::{parse, Cond};
use crate::logic::{compile, Executor, QueryBackend, RepositoryBackend};
use crate::model::{Expression, NodeId, Repository};

/// A parsed query. Keeps its syntax tree so it can be re-bound after
/// schema changes without parsing again.
///
/// The default query is the empty text and matches every node.
#[derive(Debug, Clone, Default)]
pub struct Query {
    text: String,
    tree: Option<Cond>,
    expr: Option<Expression>,
}

impl Query {
    /// Parse without binding.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self {
            text: text.to_string(),
            tree: parse(text)?,
            expr: None,
        })
    }

    /// Parse and bind against `repo`.
    pub fn new(text: &str, repo: &Repository) -> Result<Self> {
        let mut query = Self::parse(text)?;
        query.refresh(repo)?;
        Ok(query)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tree(&self) -> Option<&Cond> {
        self.tree.as_ref()
    }

    /// Bind the cached tree without storing the result.
    pub fn bind(&self, repo: &Repository) -> Result<Expression> {
        match &self.tree {
            None => Ok(Expression::All),
            Some(tree) => Ok(build(tree, repo)?.unwrap_or(Expression::Empty)),
        }
    }

    pub fn set_bound(&mut self, expr: Expression) {
        self.expr = Some(expr);
    }

    pub fn refresh(&mut self, repo: &Repository) -> Result<()> {
        self.expr = Some(self.bind(repo)?);
        Ok(())
    }

    /// The bound expression, if [`refresh`](Self::refresh) has run.
    pub fn expression(&self) -> Option<&Expression> {
        self.expr.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.expr.is_some()
    }

    /// Compile for a backend. Unbound queries are bound on the fly.
    pub fn compile<'r>(&self, backend: &dyn QueryBackend<'r>) -> Result<Box<dyn Executor + 'r>> {
        match &self.expr {
            Some(expr) => compile(expr, backend),
            None => compile(&self.bind(backend.repository())?, backend),
        }
    }

    /// Whether a single node satisfies the query.
    pub fn matches(&self, repo: &Repository, node: NodeId) -> Result<bool> {
        let exec = self.compile(&RepositoryBackend::new(repo))?;
        Ok(exec.matches(node))
    }
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.expr {
            Some(expr) => write!(f, "{}", expr),
            None => write!(f, "{}", self.text),
        }
    }
}
