pub mod builder;
pub mod convergence;
pub mod executor;
pub mod grammar;
pub mod planner;
pub mod props;
pub mod query;
pub mod selector;
pub mod transition;

pub use builder::build;
pub use convergence::{Engine, TransitionRecord};
pub use executor::*;
pub use planner::{compile, plan_and, QueryBackend, RepositoryBackend};
pub use props::{Hop, HopBinding, Props};
pub use query::Query;
pub use selector::{CompiledSelector, QuerySelector};
pub use transition::{commit, next_state, QueryCache, StateCandidate};
