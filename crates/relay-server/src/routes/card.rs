use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use relay::models::card::AgentCard;
use relay::protocol::{AGENT_CARD_PATH, LEGACY_AGENT_CARD_PATH};

async fn handler(State(state): State<AppState>) -> Json<AgentCard> {
    Json(state.card.as_ref().clone())
}

// Served on both well-known paths so older clients can still discover us
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(AGENT_CARD_PATH, get(handler))
        .route(LEGACY_AGENT_CARD_PATH, get(handler))
        .with_state(state)
}
