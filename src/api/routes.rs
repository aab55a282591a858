//! Route Definitions
//!
//! Maps URLs to handlers with type-safe routing. Mutating internal routes
//! sit behind the API-key screen; the aggregator callback and the read-only
//! routes do not.

use super::{handlers::*, middleware::require_api_key};
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::{sync::Arc, time::Duration};
use tower_http::timeout::TimeoutLayer;

/// Build the API router with all endpoints. The request timeout covers the
/// internal routes only: the aggregator callback must answer with an
/// envelope on every path, so the transport never cuts it off.
pub fn create_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    // Mutating internal routes: key-guarded when a key is configured.
    let mutating = Router::new()
        .route("/api/wallets", post(create_wallet_handler))
        .route("/api/sessions", post(open_session_handler))
        .route("/api/sessions/:id/close", post(close_session_handler))
        .route("/api/rounds", post(record_round_handler))
        .route("/api/launch", post(launch_handler))
        .layer(from_fn_with_state(state.clone(), require_api_key));

    let internal = Router::new()
        // Read-only internal routes
        .route("/api/wallets/:user_id", get(get_wallet_handler))
        .route(
            "/api/wallets/:user_id/transactions",
            get(get_transactions_handler),
        )
        .route("/api/sessions/:id", get(get_session_handler))
        .route("/api/jackpots", get(get_jackpots_handler))
        .route("/api/jackpots/wins", get(get_jackpot_wins_handler))
        // Operational
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(mutating)
        .layer(TimeoutLayer::new(request_timeout));

    Router::new()
        // Provider-facing callback: authenticated by payload encryption,
        // never by API key, never subject to the HTTP timeout.
        .route("/callback/aggregator", post(aggregator_callback_handler))
        .merge(internal)
        // Attach shared state
        .with_state(state)
}
