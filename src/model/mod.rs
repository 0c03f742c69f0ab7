pub mod common;
pub mod datatype;
pub mod expr;
pub mod graph;
pub mod node;
pub mod repository;
pub mod schema;
pub mod state;
pub mod tags;

pub use common::*;
pub use datatype::*;
pub use expr::*;
pub use node::*;
pub use repository::*;
pub use schema::*;
pub use state::*;
pub use tags::*;
