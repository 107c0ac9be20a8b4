//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the hub (the only state shared between connections) and the relay
//! limits every connection reads at setup.

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::hub::Hub;

/// Shared application state. Clone is required by Axum; all fields are
/// cheap handles.
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self { hub: Hub::new(), config: Arc::new(config) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
