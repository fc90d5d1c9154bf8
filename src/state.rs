use anyhow::{Context, Result};
use std::sync::Arc;

use crate::catalog::BenchmarkCatalog;
use crate::config::OrchestratorConfig;
use crate::machines::MachineRegistry;
use crate::results::ResultStore;
use crate::services::runs::deploy::Deployer;
use crate::services::runs::events::EventEmitter;
use crate::services::runs::session::RemoteShell;
use crate::services::runs::RunCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub config: OrchestratorConfig,
    pub machines: Arc<MachineRegistry>,
    pub runs: RunCoordinator,
}

impl AppState {
    pub fn new(config: OrchestratorConfig, shell: Arc<dyn RemoteShell>) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("create data dir {}", config.data_dir.display()))?;
        let machines = Arc::new(MachineRegistry::open(config.machines_path())?);
        let catalog = Arc::new(BenchmarkCatalog::load(config.catalog_path.as_deref())?);
        let results = Arc::new(ResultStore::new(config.results_path()));
        let runs = RunCoordinator::new(
            shell,
            Deployer::new(&config.benchmarks_dir, config.remote_dir.clone()),
            catalog,
            results,
            EventEmitter::new(config.event_buffer),
            config.timeouts,
        );
        Ok(Self {
            config,
            machines,
            runs,
        })
    }
}
