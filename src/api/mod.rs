pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::routing::{EscalationEngine, RuntimeSettings};
use crate::state::DispatchStore;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<EscalationEngine>,
    pub store: Arc<dyn DispatchStore>,
    pub settings: RuntimeSettings,
}

impl AppState {
    pub fn new(engine: Arc<EscalationEngine>, store: Arc<dyn DispatchStore>) -> Self {
        let settings = RuntimeSettings::new(store.clone());
        Self {
            engine,
            store,
            settings,
        }
    }
}
