// HTTP diagnostics for the bridge

use axum::{Router, extract::State, response::Json, routing::get};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::dispatcher::{Dispatcher, HealthReport};

pub type AppState = Arc<Dispatcher>;

/// `/health` always; `/debug/sessions` only when `debug_sessions` is set.
///
/// The debug route exposes session -> user bindings and is meant for local
/// development only.
pub fn create_router(state: AppState, debug_sessions: bool) -> Router {
    let mut router = Router::new().route("/health", get(health_check));
    if debug_sessions {
        router = router.route("/debug/sessions", get(debug_sessions_handler));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.health())
}

async fn debug_sessions_handler(State(state): State<AppState>) -> Json<Value> {
    let bindings: Vec<Value> = state
        .session_bindings()
        .into_iter()
        .map(|(session, user)| serde_json::json!({ "sessionId": session, "userId": user }))
        .collect();

    Json(serde_json::json!({
        "sessions": bindings,
        "pendingLogins": state.authenticator().pending_logins(),
        "stats": state.stats(),
    }))
}
