use std::{fs, net::SocketAddr, path::Path, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use keith_schema::Language;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    #[serde(default = "default_env")]
    pub env: String,
}

fn default_env() -> String {
    "dev".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Participant identity the agent uses in the room.
    pub identity: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    #[serde(default = "default_room")]
    pub room: String,
    #[serde(default = "default_language_tag")]
    pub default_language: String,
    #[serde(default = "default_true")]
    pub greet_on_connect: bool,
    /// Limits conversational retrieval to one category (primary or secondary).
    #[serde(default)]
    pub retrieval_category: Option<String>,
}

impl AgentSection {
    pub fn language(&self) -> Language {
        Language::parse(&self.default_language)
    }

    /// Configured category scope, lowercased; blank reads as unscoped.
    pub fn retrieval_category(&self) -> Option<String> {
        self.retrieval_category
            .as_deref()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
    }
}

fn default_display_name() -> String {
    "KEITH (AI Case Manager)".to_string()
}

fn default_room() -> String {
    "health-help-01".to_string()
}

fn default_language_tag() -> String {
    "en".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8848".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_resources_db")]
    pub resources_db: String,
    #[serde(default = "default_tasks_db")]
    pub tasks_db: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            resources_db: default_resources_db(),
            tasks_db: default_tasks_db(),
        }
    }
}

impl StorageSection {
    /// Relative paths resolve against the project root.
    pub fn resources_path(&self, root: &Path) -> PathBuf {
        root.join(&self.resources_db)
    }

    pub fn tasks_path(&self, root: &Path) -> PathBuf {
        root.join(&self.tasks_db)
    }
}

fn default_resources_db() -> String {
    "data/resources.db".to_string()
}

fn default_tasks_db() -> String {
    "data/tasks.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksSection {
    #[serde(default = "default_assigned_agent")]
    pub assigned_agent: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,
}

impl Default for TasksSection {
    fn default() -> Self {
        Self {
            assigned_agent: default_assigned_agent(),
            poll_interval_ms: default_poll_interval_ms(),
            submit_timeout_secs: default_submit_timeout_secs(),
        }
    }
}

fn default_assigned_agent() -> String {
    keith_schema::DEFAULT_ASSIGNED_AGENT.to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_submit_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralSection {
    #[serde(default = "default_magic_link_base_url")]
    pub magic_link_base_url: String,
}

impl Default for ReferralSection {
    fn default() -> Self {
        Self {
            magic_link_base_url: default_magic_link_base_url(),
        }
    }
}

fn default_magic_link_base_url() -> String {
    "http://localhost:3000/r".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSection {
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

fn default_bus_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeithConfig {
    pub app: AppConfig,
    pub agent: AgentSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub tasks: TasksSection,
    #[serde(default)]
    pub referral: ReferralSection,
    #[serde(default)]
    pub bus: BusSection,
}

pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

/// Reads `<config_dir>/main.yaml`, expands `${VAR}` placeholders and validates.
pub fn load_config(config_dir: &Path) -> Result<KeithConfig> {
    let mut config: KeithConfig = read_yaml_file(&config_dir.join("main.yaml"))?;
    resolve_config_env(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &KeithConfig) -> Result<()> {
    if config.agent.identity.trim().is_empty() {
        return Err(anyhow!("agent.identity must not be empty"));
    }
    if Language::from_tag(&config.agent.default_language).is_none() {
        return Err(anyhow!(
            "unsupported agent.default_language: {}",
            config.agent.default_language
        ));
    }
    if config.tasks.poll_interval_ms == 0 {
        return Err(anyhow!("tasks.poll_interval_ms must be greater than zero"));
    }
    if config.tasks.assigned_agent.trim().is_empty() {
        return Err(anyhow!("tasks.assigned_agent must not be empty"));
    }
    if config.bus.capacity == 0 {
        return Err(anyhow!("bus.capacity must be greater than zero"));
    }
    config
        .server
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid server.bind address: {}", config.server.bind))?;
    Ok(())
}

fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}

fn resolve_config_env(config: &mut KeithConfig) {
    config.app.name = resolve_env_var(&config.app.name);
    config.app.env = resolve_env_var(&config.app.env);
    config.agent.identity = resolve_env_var(&config.agent.identity);
    config.agent.room = resolve_env_var(&config.agent.room);
    config.agent.retrieval_category = config
        .agent
        .retrieval_category
        .as_deref()
        .map(resolve_env_var);
    config.server.bind = resolve_env_var(&config.server.bind);
    config.storage.resources_db = resolve_env_var(&config.storage.resources_db);
    config.storage.tasks_db = resolve_env_var(&config.storage.tasks_db);
    config.tasks.assigned_agent = resolve_env_var(&config.tasks.assigned_agent);
    config.referral.magic_link_base_url = resolve_env_var(&config.referral.magic_link_base_url);
}
