//! Application state.

use std::sync::Arc;

use urpc_agent::PlanAgent;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The agent serving every request.
    pub agent: Arc<PlanAgent>,
}

impl AppState {
    pub fn new(agent: PlanAgent) -> Self {
        Self {
            agent: Arc::new(agent),
        }
    }
}
