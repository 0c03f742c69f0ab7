pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod service;
pub mod store;

pub use config::{init_logging, EngineConfig, HermsConfig, LoggingConfig};
pub use error::{HermsError, Result};

// Export logic types
pub use logic::{
    Engine, Executor, Query, QueryBackend, QuerySelector, RepositoryBackend,
    StateCandidate, TransitionRecord,
};

// Export all model types
pub use model::*;

pub use service::Service;

// Export store types
pub use store::{MemoryStore, NodeStore, StoredNode};
