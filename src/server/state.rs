//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::chat::ConversationCoordinator;
use crate::config::{AtelierConfig, ConfigError};

/// Shared application state.
pub struct AppState {
    /// Conversation coordinator serving every route.
    pub coordinator: Arc<ConversationCoordinator>,
}

impl AppState {
    /// Wrap an existing coordinator.
    #[must_use]
    pub fn new(coordinator: Arc<ConversationCoordinator>) -> Arc<Self> {
        Arc::new(Self { coordinator })
    }

    /// Build the state from configuration.
    ///
    /// # Errors
    /// Returns an error if the coordinator cannot be created.
    pub fn from_config(config: &AtelierConfig) -> Result<Arc<Self>, ConfigError> {
        let coordinator = ConversationCoordinator::from_config(config)?;
        Ok(Self::new(Arc::new(coordinator)))
    }
}
