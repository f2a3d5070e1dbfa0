use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use keith_bus::EventBus;
use keith_core::{
    load_config, KeithConfig, KeithResponder, LocalRoom, Orchestrator, PersonaRegistry, Retriever,
    SessionContext,
};
use keith_store::{import_catalog, ResourceStore, SqliteResourceStore};
use keith_tasks::{SqliteTaskStore, TaskBridge, TaskStore, TaskWorker, WorkerConfig};

const SEED_CATALOG: &str = "config/resources.yaml";

/// Everything the long-running commands share, built from one config root.
pub struct Runtime {
    pub config: KeithConfig,
    pub bus: Arc<EventBus>,
    pub personas: Arc<PersonaRegistry>,
    pub resources: Arc<dyn ResourceStore>,
    pub tasks: Arc<dyn TaskStore>,
}

impl Runtime {
    pub async fn bootstrap(root: &Path) -> Result<Self> {
        let config = load_config(&root.join("config"))?;
        let resources = open_resource_store(root, &config)?;
        seed_catalog(resources.as_ref(), root).await?;

        let tasks_path = config.storage.tasks_path(root);
        let tasks = SqliteTaskStore::open(&tasks_path)
            .with_context(|| format!("failed to open task store: {}", tasks_path.display()))?;

        Ok(Self {
            bus: Arc::new(EventBus::new(config.bus.capacity)),
            personas: Arc::new(PersonaRegistry::builtin()),
            resources,
            tasks: Arc::new(tasks),
            config,
        })
    }

    pub fn task_bridge(&self) -> TaskBridge {
        TaskBridge::new(Arc::clone(&self.tasks)).with_bus(self.bus.publisher())
    }

    pub fn task_worker(&self) -> TaskWorker {
        let handler = KeithResponder::new(Arc::clone(&self.resources), Arc::clone(&self.personas));
        let config = WorkerConfig {
            worker_id: format!("keith-worker-{}", std::process::id()),
            assigned_agent: self.config.tasks.assigned_agent.clone(),
            poll_interval: Duration::from_millis(self.config.tasks.poll_interval_ms),
            ..WorkerConfig::default()
        };
        TaskWorker::new(Arc::clone(&self.tasks), Arc::new(handler), config)
            .with_bus(self.bus.publisher())
    }

    /// Conversational retriever, scoped by `agent.retrieval_category` when set.
    pub fn retriever(&self) -> Retriever {
        let retriever = Retriever::new(Arc::clone(&self.resources));
        match self.config.agent.retrieval_category() {
            Some(category) => retriever.with_category(category),
            None => retriever,
        }
    }

    pub fn orchestrator(&self, room: &LocalRoom) -> Orchestrator {
        let ctx = SessionContext {
            personas: Arc::clone(&self.personas),
            retriever: self.retriever(),
            channel: Arc::new(room.clone()),
            bus: self.bus.publisher(),
            magic_link_base_url: self.config.referral.magic_link_base_url.clone(),
            greet_on_connect: self.config.agent.greet_on_connect,
        };
        Orchestrator::new(
            ctx,
            self.config.agent.identity.clone(),
            self.config.agent.language(),
        )
    }
}

pub fn open_resource_store(root: &Path, config: &KeithConfig) -> Result<Arc<dyn ResourceStore>> {
    let path = config.storage.resources_path(root);
    let store = SqliteResourceStore::open(&path)
        .with_context(|| format!("failed to open resource store: {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Loads `config/resources.yaml` into an empty catalog.
async fn seed_catalog(store: &dyn ResourceStore, root: &Path) -> Result<()> {
    let path = root.join(SEED_CATALOG);
    if store.count().await? > 0 || !path.exists() {
        return Ok(());
    }
    let imported = import_catalog(store, &path).await?;
    tracing::info!(count = imported, path = %path.display(), "seeded resource catalog");
    Ok(())
}
