//! Node configuration.
//!
//! Loaded from `config/default.toml` (when present), then the file named by
//! `URPC_CONFIG`, then environment variables `URPC__SECTION__KEY` (double
//! underscore for nesting, e.g. `URPC__LLM__API_KEY`).

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use urpc_agent::{AgentConfig, HttpLlmClientConfig};
use urpc_core::{EntitySchema, FieldSchema};
use urpc_state::{EntityDefinition, InMemoryRepository};

/// Environment variable naming an extra config file.
pub const CONFIG_PATH_ENV: &str = "URPC_CONFIG";

/// Root of the node configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub server: ServerSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    /// Entities registered with the in-memory repository.
    pub entities: BTreeMap<String, EntitySection>,
}

/// [server]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// [llm]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// `openai` or `mock`.
    pub provider: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Canned reply of the `mock` provider.
    pub mock_response: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        let http = HttpLlmClientConfig::default();
        Self {
            provider: "openai".to_string(),
            endpoint: http.endpoint,
            api_key: None,
            model: http.model,
            temperature: http.temperature,
            timeout_secs: http.timeout_secs,
            mock_response: None,
        }
    }
}

/// [agent]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub summarize_by_default: bool,
    pub fallback_source: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        let agent = AgentConfig::default();
        Self {
            summarize_by_default: agent.summarize_by_default,
            fallback_source: agent.fallback_source,
        }
    }
}

/// [entities.<name>]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EntitySection {
    pub sources: Vec<String>,
    pub default_source: Option<String>,
    pub fields: BTreeMap<String, FieldSchema>,
}

impl NodeConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        addr.parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address {}: {}", addr, e))
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig::default()
            .summarize_by_default(self.agent.summarize_by_default)
            .fallback_source(self.agent.fallback_source.clone())
            .default_model(self.llm.model.clone())
    }

    pub fn http_llm_config(&self) -> HttpLlmClientConfig {
        HttpLlmClientConfig {
            endpoint: self.llm.endpoint.clone(),
            api_key: self.llm.api_key.clone().filter(|key| !key.is_empty()),
            model: self.llm.model.clone(),
            temperature: self.llm.temperature,
            timeout_secs: self.llm.timeout_secs,
        }
    }

    /// In-memory repository with every configured entity registered.
    pub fn repository(&self) -> InMemoryRepository {
        self.entities
            .iter()
            .fold(InMemoryRepository::new(), |repo, (name, section)| {
                let mut definition = EntityDefinition::new(EntitySchema {
                    fields: section.fields.clone(),
                });
                for source in &section.sources {
                    definition = definition.source(source.clone());
                }
                if let Some(default) = &section.default_source {
                    definition = definition.default_source(default.clone());
                }
                repo.with_entity(name.clone(), definition)
            })
    }
}

/// Load configuration from disk and the environment.
pub fn load_config(config_path: Option<PathBuf>) -> Result<NodeConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "../../config/default"] {
        if Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    let config_path = config_path.or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("URPC")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
