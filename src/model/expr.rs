use std::fmt;

use crate::logic::grammar::{Match, RelOp};
use crate::logic::Props;
use crate::model::{NodeTypeId, StateId, Value};

/// Bound expression tree. Built from the syntax tree against a schema
/// snapshot; compiled into an executor per evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Matches every node.
    All,
    /// Matches nothing.
    Empty,
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
    /// Nodes of the type or one of its subtypes.
    NodeType { id: NodeTypeId, name: String },
    State { id: StateId, name: String },
    /// A node or tag name, resolved when compiled.
    Name(NameRef),
    Rel(RelExpr),
    Apply(ApplyExpr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameRef {
    Bare(String),
    /// Dotted tag path.
    Dotted(Vec<String>),
    /// `TYPE:NAME` node reference.
    Qualified {
        ns: NodeTypeId,
        ns_name: String,
        name: String,
    },
}

/// Right-hand operand of a relational condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Decoded against the statically known property type.
    Literal { value: Value, text: String },
    /// Decoded per node once the concrete property type is known.
    Deferred(String),
}

impl Operand {
    pub fn text(&self) -> &str {
        match self {
            Operand::Literal { text, .. } => text,
            Operand::Deferred(text) => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelExpr {
    pub props: Props,
    pub op: RelOp,
    pub operands: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyExpr {
    pub props: Props,
    pub mode: Match,
    pub condition: Box<Expression>,
}

fn write_args(f: &mut fmt::Formatter, op: &str, args: &[Expression]) -> fmt::Result {
    write!(f, "{}(", op)?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{}", arg)?;
    }
    write!(f, ")")
}

impl fmt::Display for NameRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NameRef::Bare(name) => write!(f, "{}", name),
            NameRef::Dotted(parts) => write!(f, "{}", parts.join(".")),
            NameRef::Qualified { ns_name, name, .. } => write!(f, "{}:{}", ns_name, name),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expression::All => write!(f, "All"),
            Expression::Empty => write!(f, "Empty"),
            Expression::And(args) => write_args(f, "&", args),
            Expression::Or(args) => write_args(f, "|", args),
            Expression::Not(arg) => write!(f, "!({})", arg),
            Expression::NodeType { name, .. } | Expression::State { name, .. } => {
                write!(f, "{}", name)
            }
            Expression::Name(name) => write!(f, "{}", name),
            Expression::Rel(rel) => {
                write!(f, "{}({}", rel.op, rel.props)?;
                for operand in &rel.operands {
                    write!(f, ",{}", operand.text())?;
                }
                write!(f, ")")
            }
            Expression::Apply(apply) => {
                write!(f, "{}[{},{}]", apply.mode, apply.props, apply.condition)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_of_logical_terms() {
        let expr = Expression::And(vec![
            Expression::NodeType {
                id: NodeTypeId(0),
                name: "type2".to_string(),
            },
            Expression::Not(Box::new(Expression::Name(NameRef::Dotted(vec![
                "tagcat".to_string(),
                "t1".to_string(),
            ])))),
        ]);
        assert_eq!(expr.to_string(), "&(type2,!(tagcat.t1))");
        assert_eq!(Expression::All.to_string(), "All");
        assert_eq!(
            Expression::Name(NameRef::Qualified {
                ns: NodeTypeId(1),
                ns_name: "type1".to_string(),
                name: "n11".to_string()
            })
            .to_string(),
            "type1:n11"
        );
    }
}
