use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use relay::agent::Agent;
use relay::executor::{AgentExecutor, RequestContext};
use relay::models::card::{AgentCard, AgentSkill};
use relay::models::message::Message;
use relay::models::tool::ToolCall;
use relay::orchestrator::{discover_catalog, Orchestrator};
use relay::peer::{Peer, PeerClient, PeerSystem};
use relay::protocol::{AGENT_CARD_PATH, LEGACY_AGENT_CARD_PATH};
use relay::providers::mock::MockProvider;
use relay::routing::RoutingSource;
use relay::systems::ToolRegistry;
use relay::task::{TaskEmitter, TaskEvent, TaskState, TaskStore};

/// A peer that answers every message/send with `answer`, wrapped in a task result
async fn task_peer(card_path: &str, name: &str, tags: &[&str], answer: &str) -> MockServer {
    let server = MockServer::start().await;
    let card = AgentCard::new(name, format!("Helps with {}", tags.join(", ")), server.uri())
        .with_skill(AgentSkill::new("main", name, "").with_tags(tags.iter().copied()));
    Mock::given(method("GET"))
        .and(path(card_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(&card))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"jsonrpc": "2.0", "method": "message/send"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "kind": "task",
                "id": "remote-task",
                "contextId": "remote-context",
                "status": {"state": "completed"},
                "artifacts": [{
                    "artifactId": "a1",
                    "parts": [{"kind": "text", "text": answer}]
                }]
            }
        })))
        .mount(&server)
        .await;
    server
}

async fn collect(
    executor: &dyn AgentExecutor,
    store: &TaskStore,
    text: &str,
) -> (String, Vec<TaskEvent>) {
    let task = store
        .begin(&relay::protocol::WireMessage::user(text))
        .unwrap();
    let (emitter, mut receiver) = TaskEmitter::new(&task.id, &task.context_id);
    let mut emitter = emitter.with_store(store.clone());
    executor
        .execute(RequestContext::from_task(&task), &mut emitter)
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        events.push(event);
    }
    (task.id, events)
}

#[tokio::test]
async fn test_router_falls_back_on_unparseable_decision() {
    let flights = task_peer(AGENT_CARD_PATH, "Flight Finder", &["flight", "airline"], "UA 123 at 9am").await;
    // Older peers only publish the legacy card path
    let stays = task_peer(LEGACY_AGENT_CARD_PATH, "Stay Scout", &["hotel", "stay"], "Hotel Nikko").await;

    let client = PeerClient::default();
    let catalog = discover_catalog(
        &client,
        &[
            Peer::new("flightAgent", flights.uri()),
            Peer::new("stayAgent", stays.uri()),
        ],
        Some("flightAgent"),
    )
    .await
    .unwrap();
    assert_eq!(catalog.capabilities()[1].card.name, "Stay Scout");

    let provider = MockProvider::new(vec![
        Message::assistant().with_text("I think the hotel agent fits best."),
        Message::assistant().with_text("Hotel Nikko has rooms tonight."),
    ]);
    let orchestrator = Orchestrator::new(Arc::new(provider.clone()), catalog, client);

    // The routing reply is not JSON, so tag overlap picks the stay agent
    let engine_decision = relay::routing::fallback_decision(orchestrator.catalog(), "find me a hotel");
    assert_eq!(engine_decision.targets(), vec!["stayAgent"]);
    assert_eq!(engine_decision.source(), RoutingSource::Fallback);

    let store = TaskStore::new();
    let (task_id, events) = collect(&orchestrator, &store, "find me a hotel").await;

    assert_eq!(events.first().unwrap().text().as_deref(), Some("Asking Stay Scout"));
    let last = events.last().unwrap();
    assert_eq!(last.state, TaskState::Completed);
    assert_eq!(last.text().as_deref(), Some("Hotel Nikko has rooms tonight."));
    assert_eq!(events.iter().filter(|e| e.is_final).count(), 1);

    let synthesis = provider.transcripts()[1][1].text();
    assert!(synthesis.contains("Response from Stay Scout"));
    assert!(synthesis.contains("Hotel Nikko"));
    assert!(!synthesis.contains("UA 123"));

    let task = store.get(&task_id).unwrap();
    assert_eq!(task.status.state, TaskState::Completed);
}

#[tokio::test]
async fn test_agent_asks_peer_through_tool() {
    let flights = task_peer(AGENT_CARD_PATH, "Flight Finder", &["flight"], "UA 123 at 9am").await;
    let peer = Peer::new("flightAgent", flights.uri()).with_description("Books flights");
    let tool_name = PeerSystem::tool_name(&peer);

    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(PeerSystem::new(PeerClient::default(), vec![peer])))
        .unwrap();

    let provider = MockProvider::new(vec![
        Message::assistant().with_tool_request(
            "call_1",
            Ok(ToolCall::new(
                &tool_name,
                json!({"request": "Flights from SFO to JFK tomorrow"}),
            )),
        ),
        Message::assistant().with_text("Take UA 123 at 9am."),
    ]);
    let agent = Agent::new(Arc::new(provider.clone()), Arc::new(registry));

    let store = TaskStore::new();
    let (_, events) = collect(&agent, &store, "Get me to New York tomorrow").await;

    let states: Vec<_> = events.iter().map(|e| e.state).collect();
    assert_eq!(states, vec![TaskState::Working, TaskState::Completed]);
    assert_eq!(events[1].text().as_deref(), Some("Take UA 123 at 9am."));
    assert_eq!(provider.offered_tools()[0], vec![tool_name]);

    // The peer's artifact text came back as the tool output
    let transcripts = provider.transcripts();
    let output = transcripts[1][3]
        .content
        .iter()
        .find_map(|c| c.as_tool_response())
        .map(|r| r.output.clone())
        .unwrap();
    assert_eq!(output, "UA 123 at 9am");
}

#[tokio::test]
async fn test_peer_error_envelope_reaches_synthesis() {
    let server = MockServer::start().await;
    let card = AgentCard::new("Weather", "Forecasts", server.uri());
    Mock::given(method("GET"))
        .and(path(AGENT_CARD_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(&card))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32603, "message": "forecast backend down"}
        })))
        .mount(&server)
        .await;

    let client = PeerClient::default();
    let catalog = discover_catalog(&client, &[Peer::new("weatherAgent", server.uri())], None)
        .await
        .unwrap();
    let provider = MockProvider::new(vec![
        Message::assistant().with_text("```json\n{\"weatherAgent\": true}\n```"),
        Message::assistant().with_text("The weather service is unavailable right now."),
    ]);
    let orchestrator = Orchestrator::new(Arc::new(provider.clone()), catalog, client);

    let store = TaskStore::new();
    let (_, events) = collect(&orchestrator, &store, "Will it rain?").await;

    assert_eq!(events.last().unwrap().state, TaskState::Completed);
    let synthesis = provider.transcripts()[1][1].text();
    assert!(synthesis.contains("(Weather error: forecast backend down)"));
}
