use serde_json::{json, Value as Json};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{HermsError, Result};
use crate::model::{NodeId, NodeTypeId, Repository, TagId};

/// JSON scalar types a property can hold directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    String,
    Number,
    Integer,
    Boolean,
}

impl Primitive {
    /// Resolve a primitive type name, accepting the short aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" | "str" => Some(Primitive::String),
            "number" | "float" => Some(Primitive::Number),
            "integer" | "int" => Some(Primitive::Integer),
            "boolean" | "bool" => Some(Primitive::Boolean),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Primitive::String => "string",
            Primitive::Number => "number",
            Primitive::Integer => "integer",
            Primitive::Boolean => "boolean",
        }
    }
}

/// Declared type of a property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    Primitive(Primitive),
    /// A tag below the given namespace, or any tag.
    Tag(Option<TagId>),
    /// A node of the given type (or a subtype), or any node.
    Node(Option<NodeTypeId>),
    /// A type handled by a converter registered under this name.
    Custom(String),
    /// Untyped: values pass through as decoded from JSON.
    Any,
}

impl DataType {
    pub fn is_node(&self) -> bool {
        matches!(self, DataType::Node(_))
    }

    pub fn is_tag(&self) -> bool {
        matches!(self, DataType::Tag(_))
    }

    /// JSON schema fragment describing the encoded form of a single value.
    pub fn schema(&self) -> Json {
        match self {
            DataType::Primitive(p) => json!({ "type": p.name() }),
            DataType::Any => json!({}),
            _ => json!({ "type": "string" }),
        }
    }

    /// Render the type for messages, using the repository for names.
    pub fn describe(&self, repo: &Repository) -> String {
        match self {
            DataType::Primitive(p) => p.name().to_string(),
            DataType::Tag(None) => "tag".to_string(),
            DataType::Tag(Some(tag)) => repo.tags().abs_name(*tag),
            DataType::Node(None) => "node".to_string(),
            DataType::Node(Some(ty)) => repo
                .node_type(*ty)
                .map(|t| t.name.clone())
                .unwrap_or_else(|| "node".to_string()),
            DataType::Custom(name) => name.clone(),
            DataType::Any => "any".to_string(),
        }
    }
}

/// A property value, or a value a query compares against.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Number(f64),
    Integer(i64),
    Boolean(bool),
    Tag(TagId),
    Node(NodeId),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Value::Node(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> Option<TagId> {
        match self {
            Value::Tag(id) => Some(*id),
            _ => None,
        }
    }

    /// The single values held: list elements for a list, itself otherwise,
    /// nothing for `Null`.
    pub fn items(&self) -> Vec<&Value> {
        match self {
            Value::Null => Vec::new(),
            Value::List(items) => items.iter().collect(),
            other => vec![other],
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Ordering between comparable values. Integers and numbers compare
    /// numerically with each other; mismatched kinds are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    /// Equality that treats `4` and `4.0` as the same value.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            _ => match self.compare(other) {
                Some(ordering) => ordering == Ordering::Equal,
                None => self == other,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::String(s) => write!(f, "{}", s),
            Value::Number(n) => write!(f, "{}", n),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Tag(t) => write!(f, "tag#{}", t.0),
            Value::Node(n) => write!(f, "node#{}", n.0),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Encodes values to their JSON configuration form and back.
///
/// `decode(encode(v)) == v` must hold for every value the converter accepts.
pub trait DataTypeConverter: Send + Sync {
    fn encode(&self, value: &Value, data_type: &DataType, repo: &Repository) -> Result<Json>;

    fn decode(&self, data: &Json, data_type: &DataType, repo: &Repository) -> Result<Value>;
}

fn text_of(data: &Json) -> Option<String> {
    match data {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn mismatch(value: &Value, expected: &str) -> HermsError {
    HermsError::value(format!("{} is not a {} value", value, expected))
}

/// JSON has no NaN or infinity.
fn finite(n: f64) -> Result<Json> {
    serde_json::Number::from_f64(n)
        .map(Json::Number)
        .ok_or_else(|| HermsError::value(format!("{} has no JSON form", n)))
}

struct StringConverter;

impl DataTypeConverter for StringConverter {
    fn encode(&self, value: &Value, _: &DataType, _: &Repository) -> Result<Json> {
        match value {
            Value::String(s) => Ok(Json::String(s.clone())),
            other => Err(mismatch(other, "string")),
        }
    }

    fn decode(&self, data: &Json, _: &DataType, _: &Repository) -> Result<Value> {
        text_of(data)
            .map(Value::String)
            .ok_or_else(|| HermsError::value(format!("{}: expected a string", data)))
    }
}

struct NumberConverter;

impl DataTypeConverter for NumberConverter {
    fn encode(&self, value: &Value, _: &DataType, _: &Repository) -> Result<Json> {
        match value {
            Value::Number(n) => finite(*n),
            Value::Integer(i) => Ok(json!(*i as f64)),
            other => Err(mismatch(other, "number")),
        }
    }

    fn decode(&self, data: &Json, _: &DataType, _: &Repository) -> Result<Value> {
        match data {
            Json::Number(n) => n
                .as_f64()
                .map(Value::Number)
                .ok_or_else(|| HermsError::value(format!("{}: not a number", n))),
            Json::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| HermsError::value(format!("{}: not a number", s))),
            other => Err(HermsError::value(format!("{}: not a number", other))),
        }
    }
}

struct IntegerConverter;

impl DataTypeConverter for IntegerConverter {
    fn encode(&self, value: &Value, _: &DataType, _: &Repository) -> Result<Json> {
        match value {
            Value::Integer(i) => Ok(json!(*i)),
            other => Err(mismatch(other, "integer")),
        }
    }

    fn decode(&self, data: &Json, _: &DataType, _: &Repository) -> Result<Value> {
        match data {
            Json::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::Integer(i)),
                None => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 => Ok(Value::Integer(f as i64)),
                    _ => Err(HermsError::value(format!("{}: not an integer", n))),
                },
            },
            Json::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| HermsError::value(format!("{}: not an integer", s))),
            other => Err(HermsError::value(format!("{}: not an integer", other))),
        }
    }
}

struct BooleanConverter;

impl DataTypeConverter for BooleanConverter {
    fn encode(&self, value: &Value, _: &DataType, _: &Repository) -> Result<Json> {
        match value {
            Value::Boolean(b) => Ok(Json::Bool(*b)),
            other => Err(mismatch(other, "boolean")),
        }
    }

    fn decode(&self, data: &Json, _: &DataType, _: &Repository) -> Result<Value> {
        match data {
            Json::Bool(b) => Ok(Value::Boolean(*b)),
            Json::String(s) => Ok(Value::Boolean(matches!(
                s.to_lowercase().as_str(),
                "1" | "true" | "yes"
            ))),
            Json::Number(n) => Ok(Value::Boolean(n.as_f64() != Some(0.0))),
            other => Err(HermsError::value(format!("{}: not a boolean", other))),
        }
    }
}

struct TagConverter;

impl DataTypeConverter for TagConverter {
    fn encode(&self, value: &Value, data_type: &DataType, repo: &Repository) -> Result<Json> {
        let tag = value.as_tag().ok_or_else(|| mismatch(value, "tag"))?;
        let forest = repo.tags();
        let entry = forest
            .get(tag)
            .ok_or_else(|| HermsError::not_found("tag", format!("#{}", tag.0)))?;
        match data_type {
            DataType::Tag(Some(ns)) if entry.parent == Some(*ns) => {
                Ok(Json::String(entry.name.clone()))
            }
            _ => Ok(Json::String(forest.abs_name(tag))),
        }
    }

    fn decode(&self, data: &Json, data_type: &DataType, repo: &Repository) -> Result<Value> {
        let text = text_of(data)
            .ok_or_else(|| HermsError::value(format!("{}: expected a tag name", data)))?;
        let forest = repo.tags();
        let found = match data_type {
            DataType::Tag(Some(ns)) => forest
                .lookup_under(*ns, &text)
                .or_else(|| forest.lookup(&text)),
            _ => forest.lookup(&text),
        };
        found
            .map(Value::Tag)
            .ok_or_else(|| HermsError::not_found("tag", text))
    }
}

struct NodeConverter;

impl DataTypeConverter for NodeConverter {
    fn encode(&self, value: &Value, data_type: &DataType, repo: &Repository) -> Result<Json> {
        let id = value.as_node().ok_or_else(|| mismatch(value, "node"))?;
        let node = repo
            .get_node(id)
            .ok_or_else(|| HermsError::not_found("node", format!("#{}", id.0)))?;
        match data_type {
            DataType::Node(Some(ty)) if *ty == node.node_type => {
                Ok(Json::String(node.name.clone()))
            }
            _ => {
                let type_name = repo
                    .node_type(node.node_type)
                    .map(|t| t.name.as_str())
                    .unwrap_or_default();
                Ok(Json::String(format!("{}:{}", type_name, node.name)))
            }
        }
    }

    fn decode(&self, data: &Json, data_type: &DataType, repo: &Repository) -> Result<Value> {
        let text = text_of(data)
            .ok_or_else(|| HermsError::value(format!("{}: expected a node name", data)))?;
        let declared = match data_type {
            DataType::Node(ty) => *ty,
            _ => None,
        };
        repo.node_or_error(&text, declared).map(Value::Node)
    }
}

/// Converter for untyped properties: JSON scalars and arrays map directly.
struct PassThroughConverter;

impl DataTypeConverter for PassThroughConverter {
    fn encode(&self, value: &Value, data_type: &DataType, repo: &Repository) -> Result<Json> {
        match value {
            Value::Null => Ok(Json::Null),
            Value::String(s) => Ok(Json::String(s.clone())),
            Value::Integer(i) => Ok(json!(*i)),
            Value::Number(n) => finite(*n),
            Value::Boolean(b) => Ok(Json::Bool(*b)),
            Value::Tag(_) => TagConverter.encode(value, &DataType::Tag(None), repo),
            Value::Node(_) => NodeConverter.encode(value, &DataType::Node(None), repo),
            Value::List(items) => items
                .iter()
                .map(|item| self.encode(item, data_type, repo))
                .collect::<Result<Vec<_>>>()
                .map(Json::Array),
        }
    }

    fn decode(&self, data: &Json, data_type: &DataType, repo: &Repository) -> Result<Value> {
        match data {
            Json::Null => Ok(Value::Null),
            Json::String(s) => Ok(Value::String(s.clone())),
            Json::Bool(b) => Ok(Value::Boolean(*b)),
            Json::Number(n) => Ok(match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            }),
            Json::Array(items) => items
                .iter()
                .map(|item| self.decode(item, data_type, repo))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            Json::Object(_) => Err(HermsError::value("objects are not property values")),
        }
    }
}

/// Converters keyed by type name.
#[derive(Clone)]
pub struct ConverterRegistry {
    converters: HashMap<String, Arc<dyn DataTypeConverter>>,
    fallback: Arc<dyn DataTypeConverter>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        let mut converters: HashMap<String, Arc<dyn DataTypeConverter>> = HashMap::new();
        converters.insert("string".to_string(), Arc::new(StringConverter));
        converters.insert("number".to_string(), Arc::new(NumberConverter));
        converters.insert("integer".to_string(), Arc::new(IntegerConverter));
        converters.insert("boolean".to_string(), Arc::new(BooleanConverter));
        converters.insert("tag".to_string(), Arc::new(TagConverter));
        converters.insert("node".to_string(), Arc::new(NodeConverter));
        Self {
            converters,
            fallback: Arc::new(PassThroughConverter),
        }
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names: Vec<&String> = self.converters.keys().collect();
        names.sort();
        f.debug_struct("ConverterRegistry")
            .field("converters", &names)
            .finish()
    }
}

impl ConverterRegistry {
    pub fn register(&mut self, name: &str, converter: Arc<dyn DataTypeConverter>) {
        self.converters.insert(name.to_string(), converter);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.converters.contains_key(name)
    }

    pub fn converter_for(&self, data_type: &DataType) -> Result<Arc<dyn DataTypeConverter>> {
        let name = match data_type {
            DataType::Primitive(p) => p.name(),
            DataType::Tag(_) => "tag",
            DataType::Node(_) => "node",
            DataType::Custom(name) => name.as_str(),
            DataType::Any => return Ok(self.fallback.clone()),
        };
        self.converters
            .get(name)
            .cloned()
            .ok_or_else(|| HermsError::not_found("converter", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_aliases() {
        assert_eq!(Primitive::from_name("int"), Some(Primitive::Integer));
        assert_eq!(Primitive::from_name("float"), Some(Primitive::Number));
        assert_eq!(Primitive::from_name("str"), Some(Primitive::String));
        assert_eq!(Primitive::from_name("bool"), Some(Primitive::Boolean));
        assert_eq!(Primitive::from_name("tag"), None);
    }

    #[test]
    fn test_value_compare_across_numeric_kinds() {
        assert_eq!(
            Value::Integer(4).compare(&Value::Number(4.5)),
            Some(Ordering::Less)
        );
        assert!(Value::Integer(4).loose_eq(&Value::Number(4.0)));
        assert!(!Value::Integer(4).loose_eq(&Value::String("4".to_string())));
        assert_eq!(Value::String("a".into()).compare(&Value::Integer(1)), None);
    }

    #[test]
    fn test_primitive_round_trip() {
        let repo = Repository::new();
        let registry = ConverterRegistry::default();
        let cases = vec![
            (DataType::Primitive(Primitive::Integer), Value::Integer(-12)),
            (DataType::Primitive(Primitive::Number), Value::Number(2.5)),
            (DataType::Primitive(Primitive::Boolean), Value::Boolean(true)),
            (
                DataType::Primitive(Primitive::String),
                Value::String("text".to_string()),
            ),
        ];
        for (ty, value) in cases {
            let conv = registry.converter_for(&ty).unwrap();
            let json = conv.encode(&value, &ty, &repo).unwrap();
            assert_eq!(conv.decode(&json, &ty, &repo).unwrap(), value);
        }
    }

    #[test]
    fn test_non_finite_numbers_do_not_encode() {
        let repo = Repository::new();
        let registry = ConverterRegistry::default();
        let number = DataType::Primitive(Primitive::Number);
        let conv = registry.converter_for(&number).unwrap();
        for n in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                conv.encode(&Value::Number(n), &number, &repo),
                Err(HermsError::Value(_))
            ));
        }
        let any = registry.converter_for(&DataType::Any).unwrap();
        assert!(any.encode(&Value::Number(f64::NAN), &DataType::Any, &repo).is_err());
        assert_eq!(
            conv.encode(&Value::Number(1.5), &number, &repo).unwrap(),
            json!(1.5)
        );
    }

    #[test]
    fn test_decode_from_query_text() {
        let repo = Repository::new();
        let registry = ConverterRegistry::default();
        let int = DataType::Primitive(Primitive::Integer);
        let conv = registry.converter_for(&int).unwrap();
        assert_eq!(
            conv.decode(&json!("10"), &int, &repo).unwrap(),
            Value::Integer(10)
        );
        assert!(conv.decode(&json!("ten"), &int, &repo).is_err());

        let boolean = DataType::Primitive(Primitive::Boolean);
        let conv = registry.converter_for(&boolean).unwrap();
        assert_eq!(
            conv.decode(&json!("Yes"), &boolean, &repo).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn test_unknown_custom_converter() {
        let registry = ConverterRegistry::default();
        assert!(registry
            .converter_for(&DataType::Custom("date".to_string()))
            .is_err());
    }
}
