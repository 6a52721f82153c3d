//! Server state management
//!
//! Shared state: the engine plus the in-memory collaborators it reports to.

use crate::dashboard::Dashboard;
use crate::inbox::Inbox;
use crate::presence::Presence;
use crate::runs::Runs;
use crate::store::MemoryStore;
use pledge_core::VariantRegistry;
use pledge_engine::{Engine, EngineConfig, Ports, Timing};
use std::sync::Arc;

/// Server-wide shared state
pub struct ServerState {
    pub engine: Arc<Engine>,
    pub inbox: Arc<Inbox>,
    pub store: Arc<MemoryStore>,
    pub dashboard: Arc<Dashboard>,
    pub presence: Presence,
    pub runs: Runs,
}

impl ServerState {
    /// State over the built-in variants
    pub fn new(timing: Timing) -> Self {
        Self::build(Arc::new(VariantRegistry::builtin()), timing, None)
    }

    /// State from an engine configuration file's contents
    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let registry = Arc::new(config.registry()?);
        Ok(Self::build(registry, config.timing.clone(), config.seed))
    }

    fn build(registry: Arc<VariantRegistry>, timing: Timing, seed: Option<u64>) -> Self {
        let inbox = Arc::new(Inbox::new());
        let store = Arc::new(MemoryStore::new());
        let dashboard = Arc::new(Dashboard::new(registry.clone()));
        let ports = Ports::new(inbox.clone(), store.clone(), dashboard.clone());

        Self {
            engine: Engine::new(registry, timing, seed, ports),
            inbox,
            store,
            dashboard,
            presence: Presence::new(),
            runs: Runs::new(),
        }
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(Timing::default())
    }
}
