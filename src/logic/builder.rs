use log::trace;
use serde_json::Value as Json;

use crate::error::{HermsError, Result};
use crate::logic::grammar::{Cond, Ident, Literal};
use crate::logic::Props;
use crate::model::{ApplyExpr, DataType, Expression, NameRef, Operand, RelExpr, Repository, Value};

/// Bind a syntax tree against the repository schema.
///
/// `None` marks a term that can never match. OR drops such members; any
/// other composite containing one collapses to `None`, except NOT which
/// turns it into [`Expression::All`].
pub fn build(cond: &Cond, repo: &Repository) -> Result<Option<Expression>> {
    let expr = match cond {
        Cond::Or(args) => {
            let mut members = Vec::with_capacity(args.len());
            for arg in args {
                if let Some(expr) = build(arg, repo)? {
                    members.push(expr);
                }
            }
            match members.len() {
                0 => None,
                1 => members.pop(),
                _ => Some(Expression::Or(members)),
            }
        }
        Cond::And(args) => {
            let mut members = Vec::with_capacity(args.len());
            for arg in args {
                match build(arg, repo)? {
                    Some(expr) => members.push(expr),
                    None => return Ok(None),
                }
            }
            match members.len() {
                0 => Some(Expression::All),
                1 => members.pop(),
                _ => Some(Expression::And(members)),
            }
        }
        Cond::Not(arg) => match build(arg, repo)? {
            Some(expr) => Some(Expression::Not(Box::new(expr))),
            None => Some(Expression::All),
        },
        Cond::Pred(ident) => Some(predicate(ident, repo)?),
        Cond::Rel { path, op, values } => {
            let props = Props::resolve(path, repo, false)?;
            let operands = values
                .iter()
                .map(|v| operand(v, props.value_type(), repo))
                .collect::<Result<Vec<_>>>()?;
            Some(Expression::Rel(RelExpr {
                props,
                op: *op,
                operands,
            }))
        }
        Cond::Apply { path, mode, body } => {
            let props = Props::resolve(path, repo, true)?;
            build(body, repo)?.map(|condition| {
                Expression::Apply(ApplyExpr {
                    props,
                    mode: *mode,
                    condition: Box::new(condition),
                })
            })
        }
    };
    trace!("Bound {:?} to {:?}", cond, expr);
    Ok(expr)
}

fn predicate(ident: &Ident, repo: &Repository) -> Result<Expression> {
    Ok(match ident {
        Ident::Name(name) => {
            if let Some(id) = repo.node_type_id(name) {
                Expression::NodeType {
                    id,
                    name: name.clone(),
                }
            } else if let Some(id) = repo.state_id(name) {
                Expression::State {
                    id,
                    name: name.clone(),
                }
            } else {
                Expression::Name(NameRef::Bare(name.clone()))
            }
        }
        Ident::Dotted(parts) => Expression::Name(NameRef::Dotted(parts.clone())),
        Ident::Qualified { ns, name } => {
            let id = repo
                .node_type_id(ns)
                .ok_or_else(|| HermsError::query(format!("{}:{}: unknown node type", ns, name)))?;
            Expression::Name(NameRef::Qualified {
                ns: id,
                ns_name: ns.clone(),
                name: name.clone(),
            })
        }
    })
}

fn operand(literal: &Literal, ty: Option<&DataType>, repo: &Repository) -> Result<Operand> {
    let text = literal.text();
    let Some(ty) = ty else {
        return Ok(Operand::Deferred(text));
    };
    let value = decode_text(repo, &text, ty)
        .map_err(|e| HermsError::query(format!("'{}': {}", text, e)))?;
    Ok(Operand::Literal { value, text })
}

/// Decode query text against a declared type. Untyped values are read as
/// JSON scalars when they look like one.
pub(crate) fn decode_text(repo: &Repository, text: &str, ty: &DataType) -> Result<Value> {
    let data = match ty {
        DataType::Any => serde_json::from_str::<Json>(text)
            .ok()
            .filter(|d| !d.is_object() && !d.is_array())
            .unwrap_or_else(|| Json::String(text.to_string())),
        _ => Json::String(text.to_string()),
    };
    repo.converters().converter_for(ty)?.decode(&data, ty, repo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::grammar::parse;
    use crate::model::RepositoryConfig;
    use serde_json::json;

    fn repo() -> Repository {
        let cfg: RepositoryConfig = serde_json::from_value(json!({
            "tags": {"tagcat": {"children": ["t1", "t2"]}},
            "types": {
                "type1": {"properties": {"num": "int", "cat": "tagcat", "ref": "type1", "any": "any"}}
            },
            "states": {"active": {}},
            "nodes": {"type1": {"n1": {}}}
        }))
        .unwrap();
        let mut repo = Repository::new();
        repo.configure(&cfg).unwrap();
        repo
    }

    fn bind(text: &str, repo: &Repository) -> Result<Option<Expression>> {
        let cond = parse(text)?.unwrap();
        build(&cond, repo)
    }

    #[test]
    fn test_predicates_resolve_types_and_states_first() {
        let repo = repo();
        assert!(matches!(
            bind("type1", &repo).unwrap(),
            Some(Expression::NodeType { .. })
        ));
        assert!(matches!(
            bind("active", &repo).unwrap(),
            Some(Expression::State { .. })
        ));
        assert_eq!(
            bind("n1", &repo).unwrap(),
            Some(Expression::Name(NameRef::Bare("n1".to_string())))
        );
        assert!(bind("nope:n1", &repo).is_err());
    }

    #[test]
    fn test_operands_decode_against_the_property_type() {
        let repo = repo();
        let Some(Expression::Rel(rel)) = bind("num>5", &repo).unwrap() else {
            panic!("expected a relation");
        };
        assert_eq!(
            rel.operands,
            vec![Operand::Literal {
                value: Value::Integer(5),
                text: "5".to_string()
            }]
        );
        let Some(Expression::Rel(rel)) = bind("any=5", &repo).unwrap() else {
            panic!("expected a relation");
        };
        assert!(matches!(
            rel.operands[0],
            Operand::Literal {
                value: Value::Integer(5),
                ..
            }
        ));
        assert!(bind("num=abc", &repo).is_err());
        assert!(bind("cat=tagcat.t3", &repo).is_err());
        assert!(bind("ref=n2", &repo).is_err());
    }

    #[test]
    fn test_composites_keep_their_members() {
        let repo = repo();
        let or = bind("type1|n1", &repo).unwrap().unwrap();
        assert!(matches!(or, Expression::Or(ref m) if m.len() == 2));
        assert_eq!(
            bind("!(ref&{type1})", &repo).unwrap().map(|e| e.to_string()),
            Some("!(&[ref,type1])".to_string())
        );
    }
}
