use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment, File, FileFormat};
use relay::agent::DEFAULT_MAX_TURNS;
use relay::peer::{Peer, DEFAULT_PEER_TIMEOUT};
use relay::systems::ToolServer;
use relay::providers::{
    configs::{OllamaProviderConfig, OpenAiProviderConfig, ProviderConfig},
    factory::ProviderType,
    ollama, openai,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

/// Path of an optional TOML file layered under the environment
pub const CONFIG_FILE_VAR: &str = "RELAY_CONFIG";

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Address advertised in the agent card, when it differs from the bind address
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                env_var: to_env_var("server.host"),
                reason: e.to_string(),
            })
    }

    /// The JSON-RPC endpoint peers should post to
    pub fn advertised_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.clone(),
            None => format!("http://{}:{}/", self.host, self.port),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    Ollama {
        #[serde(default = "default_ollama_host")]
        host: String,
        #[serde(default = "default_ollama_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
}

impl ProviderSettings {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderSettings::OpenAi { .. } => ProviderType::OpenAi,
            ProviderSettings::Ollama { .. } => ProviderType::Ollama,
        }
    }

    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            }),
            ProviderSettings::Ollama {
                host,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::Ollama(OllamaProviderConfig {
                host,
                model,
                temperature,
                max_tokens,
            }),
        }
    }
}

/// How the served agent answers requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Bounded tool loop; peers are offered to the model as tools
    #[default]
    Tools,
    /// Route each request to peers, then merge their answers
    Router,
}

#[derive(Debug, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_agent_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mode: AgentMode,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,
    /// Peer used when routing finds no better match; defaults to the first peer
    #[serde(default)]
    pub primary: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            description: String::new(),
            mode: AgentMode::default(),
            max_turns: default_max_turns(),
            temperature: None,
            persona: None,
            peer_timeout_secs: default_peer_timeout_secs(),
            primary: None,
        }
    }
}

impl AgentSettings {
    pub fn max_turns(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.max_turns).ok_or_else(|| ConfigError::InvalidValue {
            env_var: to_env_var("agent.max_turns"),
            reason: "must be at least 1".to_string(),
        })
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    /// Agents this one may delegate to
    #[serde(default)]
    pub peers: Vec<Peer>,
    /// External tool servers offered to the model in tools mode
    #[serde(default)]
    pub tool_servers: Vec<ToolServer>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let file = std::env::var(CONFIG_FILE_VAR).ok();
        Self::load_and_validate(file.as_deref())
    }

    /// Defaults, then the TOML file at `file` if given, then `RELAY_*` variables
    pub fn load_and_validate(file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?;

        if let Some(path) = file {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("RELAY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings = match config.try_deserialize::<Self>() {
            Ok(settings) => settings,
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                return if error_str.starts_with("missing field") {
                    // "missing field `type`"
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                };
            }
        };

        settings.agent.max_turns()?;
        if settings.agent.mode == AgentMode::Router && settings.peers.is_empty() {
            return Err(ConfigError::InvalidValue {
                env_var: to_env_var("agent.mode"),
                reason: "router mode needs at least one peer".to_string(),
            });
        }
        Ok(settings)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    10000
}

fn default_agent_name() -> String {
    "Relay Agent".to_string()
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS.get()
}

fn default_peer_timeout_secs() -> u64 {
    DEFAULT_PEER_TIMEOUT.as_secs()
}

fn default_openai_host() -> String {
    openai::OPENAI_HOST.to_string()
}

fn default_openai_model() -> String {
    openai::OPENAI_MODEL.to_string()
}

fn default_ollama_host() -> String {
    ollama::OLLAMA_HOST.to_string()
}

fn default_ollama_model() -> String {
    ollama::OLLAMA_MODEL.to_string()
}
