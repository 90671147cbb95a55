use crate::config::{StateBackend, StateConfig};
use crate::error::{AppError, Result};
use crate::state::{DispatchStore, InMemoryStore, SledStore};
use std::sync::Arc;

/// Create a dispatch store based on configuration
pub async fn create_store(config: &StateConfig) -> Result<Arc<dyn DispatchStore>> {
    match config.backend {
        StateBackend::Sled => {
            let path = config.path.as_ref().ok_or_else(|| {
                AppError::Configuration("Sled backend requires 'path' configuration".to_string())
            })?;

            tracing::info!(path = ?path, "Initializing sled storage backend");

            let store = SledStore::new(path)?;
            Ok(Arc::new(store))
        }

        StateBackend::Memory => {
            tracing::info!("Initializing in-memory storage backend");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

/// Create an in-memory store (for testing and development)
pub fn create_in_memory_store() -> Arc<dyn DispatchStore> {
    Arc::new(InMemoryStore::new())
}
