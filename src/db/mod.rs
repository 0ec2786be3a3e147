//! Storage for endpoints and their check history.
//!
//! The engine only talks to [`ResultStore`]; SQLite and in-memory
//! implementations are provided.

mod adapter;
mod memory;
mod models;
mod plan;
mod store;

pub use adapter::*;
pub use memory::*;
pub use models::*;
pub use plan::*;
pub use store::*;
