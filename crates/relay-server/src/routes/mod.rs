// Export route modules
pub mod card;
pub mod health;
pub mod rpc;

use crate::state::AppState;
use axum::Router;

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(card::routes(state.clone()))
        .merge(rpc::routes(state))
        .merge(health::routes())
}
