//! HTTP endpoints.

pub mod agent;
pub mod health;
pub mod schema;
