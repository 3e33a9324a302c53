//! # URPC SDK
//!
//! Client SDK for URPC nodes: run requests, follow streamed progress, or
//! plan remotely and execute against a local repository.

pub mod client;
pub mod stream;

pub use client::UrpcClient;
pub use stream::{EventStream, NdjsonDecoder};

/// Prelude module for common imports.
pub mod prelude {
    pub use crate::client::UrpcClient;
    pub use crate::stream::EventStream;
    pub use urpc_agent::AgentRequest;
    pub use urpc_core::prelude::*;
}
