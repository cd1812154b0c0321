use anyhow::Result;
use relay::agent::Agent;
use relay::executor::AgentExecutor;
use relay::models::card::{AgentCard, AgentSkill};
use relay::orchestrator::{discover_catalog, Orchestrator};
use relay::peer::{PeerClient, PeerSystem};
use relay::providers::factory;
use relay::systems::{RemoteSystem, ToolRegistry};
use relay::task::TaskStore;
use std::sync::Arc;

use crate::configuration::{AgentMode, Settings};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub card: Arc<AgentCard>,
    pub executor: Arc<dyn AgentExecutor>,
    pub tasks: TaskStore,
}

impl AppState {
    pub fn new(card: AgentCard, executor: Arc<dyn AgentExecutor>) -> Self {
        Self {
            card: Arc::new(card),
            executor,
            tasks: TaskStore::new(),
        }
    }

    /// Build the provider and executor the settings describe, and the card advertising them
    pub async fn from_settings(settings: Settings) -> Result<Self> {
        let max_turns = settings.agent.max_turns()?;
        let peers = settings.peers;
        let tool_servers = settings.tool_servers;
        let agent = settings.agent;
        let client = PeerClient::new(agent.peer_timeout());
        let provider_type = settings.provider.provider_type();
        let provider = factory::get_provider(settings.provider.into_config())?;

        let mut card = AgentCard::new(
            &agent.name,
            &agent.description,
            settings.server.advertised_url(),
        );

        let executor: Arc<dyn AgentExecutor> = match agent.mode {
            AgentMode::Tools => {
                let mut registry = ToolRegistry::new();
                for server in tool_servers {
                    let system = RemoteSystem::connect(server, agent.peer_timeout()).await?;
                    registry.register(Arc::new(system))?;
                }
                if !peers.is_empty() {
                    registry.register(Arc::new(PeerSystem::new(client, peers)))?;
                }
                for tool in registry.describe() {
                    card = card.with_skill(AgentSkill::new(&tool.name, &tool.name, &tool.description));
                }

                let mut executor = Agent::new(provider, Arc::new(registry))
                    .with_max_turns(max_turns)
                    .with_temperature(agent.temperature)
                    .with_structured_replies(true);
                if let Some(persona) = &agent.persona {
                    executor = executor.with_persona(persona);
                }
                Arc::new(executor)
            }
            AgentMode::Router => {
                let catalog = discover_catalog(&client, &peers, agent.primary.as_deref()).await?;
                for capability in catalog.capabilities() {
                    card = card.with_skill(
                        AgentSkill::new(
                            &capability.id,
                            &capability.card.name,
                            &capability.card.description,
                        )
                        .with_tags(capability.card.tags()),
                    );
                }

                let mut executor = Orchestrator::new(provider, catalog, client)
                    .with_temperature(agent.temperature);
                if let Some(persona) = &agent.persona {
                    executor = executor.with_persona(persona);
                }
                Arc::new(executor)
            }
        };

        tracing::info!(
            name = %card.name,
            mode = ?agent.mode,
            provider = %provider_type,
            skills = card.skills.len(),
            "agent ready"
        );
        Ok(Self::new(card, executor))
    }
}
