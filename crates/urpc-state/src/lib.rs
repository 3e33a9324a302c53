//! # URPC State
//!
//! Reference in-memory repository, used by the node binary and in tests.

pub mod filter;
pub mod store;

pub use filter::RecordFilter;
pub use store::{EntityDefinition, InMemoryRepository, ID_FIELD};
