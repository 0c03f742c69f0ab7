use thiserror::Error;

/// Errors raised by the repository, the query language and the lifecycle engines.
#[derive(Debug, Error)]
pub enum HermsError {
    /// Malformed query text, an unresolvable identifier, or a path with no
    /// matching property.
    #[error("query format error: {0}")]
    QueryFormat(String),

    /// A bare entity name exists under more than one node type.
    #[error("{name}: ambiguous name (in {first} and {second})")]
    Ambiguous {
        name: String,
        first: String,
        second: String,
    },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// Invalid schema or repository configuration.
    #[error("schema error: {0}")]
    Schema(String),

    /// A value could not be decoded or does not fit the declared type.
    #[error("value error: {0}")]
    Value(String),

    /// The reverse property index disagrees with the forward values.
    /// This is an implementation bug, never a user error.
    #[error("referential integrity violated: {0}")]
    Integrity(String),

    #[error("{phase} did not converge within {rounds} rounds")]
    NonTermination { phase: &'static str, rounds: usize },

    #[error("service '{service}' failed: {source}")]
    Service {
        service: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type Result<T, E = HermsError> = std::result::Result<T, E>;

impl HermsError {
    pub fn query(msg: impl Into<String>) -> Self {
        HermsError::QueryFormat(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        HermsError::Schema(msg.into())
    }

    pub fn value(msg: impl Into<String>) -> Self {
        HermsError::Value(msg.into())
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        HermsError::NotFound {
            kind,
            name: name.into(),
        }
    }
}
