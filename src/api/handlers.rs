//! HTTP Request Handlers
//!
//! Thin translation layer between HTTP and the domain stores. Handlers parse
//! and validate input, delegate, and map domain errors onto `ApiError`. The
//! aggregator callback is the one exception: it always answers HTTP 200 with
//! a protocol envelope.

use crate::api::errors::ApiError;
use crate::api::middleware::RequestId;
use crate::api::models::*;
use crate::api::monitoring::MetricsRegistry;
use crate::currency::Currency;
use crate::directory::GameCatalog;
use crate::gateway::protocol::{code, CallbackEnvelope, ResponseEnvelope};
use crate::gateway::{Gateway, LaunchClient};
use crate::jackpot::JackpotStore;
use crate::ledger_store::LedgerStore;
use crate::settlement::{RoundOutcome, RoundRequest, SettlementCoordinator};
use crate::storage::Storage;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

/// Shared application state
pub struct AppState {
    pub storage: Storage,
    pub ledger: LedgerStore,
    pub jackpots: JackpotStore,
    pub catalog: GameCatalog,
    pub coordinator: Arc<SettlementCoordinator>,
    pub gateway: Arc<Gateway>,
    pub launch: Arc<LaunchClient>,
    pub metrics: Arc<MetricsRegistry>,
    pub api_key: Option<String>,
}

fn page_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

fn parse_currency(request_id: &RequestId, code: &str) -> Result<Currency, ApiError> {
    code.parse().map_err(|_| {
        ApiError::bad_request(
            request_id.0.clone(),
            format!("unsupported currency: {}", code),
        )
    })
}

// ---------------------------------------------------------------------------
// Aggregator callback
// ---------------------------------------------------------------------------

/// The provider-facing endpoint. Transport-level success is unconditional:
/// every outcome, including a malformed body, is an HTTP 200 envelope.
pub async fn aggregator_callback_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CallbackEnvelope>, JsonRejection>,
) -> Json<ResponseEnvelope> {
    let envelope = match payload {
        Ok(Json(envelope)) => envelope,
        Err(rejection) => {
            MetricsRegistry::incr(&state.metrics.callbacks_total);
            MetricsRegistry::incr(&state.metrics.callback_errors_total);
            tracing::warn!(error = %rejection, "Unparseable callback body");
            return Json(ResponseEnvelope::error(
                code::MALFORMED_PAYLOAD,
                "unparseable request body",
            ));
        }
    };
    Json(state.gateway.handle(envelope).await)
}

// ---------------------------------------------------------------------------
// Wallets
// ---------------------------------------------------------------------------

pub async fn create_wallet_handler(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Json(req): Json<CreateWalletRequest>,
) -> Result<(StatusCode, Json<WalletResponse>), ApiError> {
    let mut initial: BTreeMap<Currency, rust_decimal::Decimal> = BTreeMap::new();
    for (code, amount) in req.initial_balances {
        initial.insert(parse_currency(&request_id, &code)?, amount);
    }

    let wallet = state
        .ledger
        .create_wallet(&req.user_id, initial)
        .map_err(|e| ApiError::from_domain(request_id.0.clone(), e))?;

    tracing::info!(user_id = %wallet.user_id, "Wallet provisioned");
    Ok((StatusCode::CREATED, Json(wallet.into())))
}

pub async fn get_wallet_handler(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Path(user_id): Path<String>,
) -> Result<Json<WalletResponse>, ApiError> {
    let wallet = state
        .ledger
        .wallet(&user_id)
        .map_err(|e| ApiError::from_domain(request_id.0.clone(), e))?;
    Ok(Json(wallet.into()))
}

pub async fn get_transactions_handler(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Path(user_id): Path<String>,
    Query(query): Query<TransactionsQuery>,
) -> Result<Json<TransactionsPage>, ApiError> {
    let currency = match &query.currency {
        Some(code) => Some(parse_currency(&request_id, code)?),
        None => None,
    };

    let (transactions, next_cursor) = state
        .ledger
        .user_transactions(
            &user_id,
            currency,
            query.cursor.as_deref(),
            page_limit(query.limit),
        )
        .map_err(|e| ApiError::from_domain(request_id.0.clone(), e))?;

    Ok(Json(TransactionsPage {
        transactions,
        next_cursor,
    }))
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

pub async fn open_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Json(req): Json<OpenSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let currency = parse_currency(&request_id, &req.currency)?;
    if state.catalog.by_id(&req.game_id).is_none() {
        return Err(ApiError::not_found(
            request_id.0,
            format!("unknown game: {}", req.game_id),
        ));
    }

    let session = state
        .ledger
        .open_session(&req.user_id, &req.game_id, currency)
        .map_err(|e| ApiError::from_domain(request_id.0.clone(), e))?;

    tracing::info!(session_id = %session.id, user_id = %session.user_id, "Session opened");
    Ok((StatusCode::CREATED, Json(session.into())))
}

pub async fn close_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .ledger
        .close_session(session_id)
        .map_err(|e| ApiError::from_domain(request_id.0.clone(), e))?;

    tracing::info!(%session_id, rounds = session.rounds_played, "Session closed");
    Ok(Json(session.into()))
}

pub async fn get_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .ledger
        .session(session_id)
        .map_err(|e| ApiError::from_domain(request_id.0.clone(), e))?;
    Ok(Json(session.into()))
}

// ---------------------------------------------------------------------------
// Rounds
// ---------------------------------------------------------------------------

pub async fn record_round_handler(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Json(req): Json<RecordRoundRequest>,
) -> Result<(StatusCode, Json<RoundOutcome>), ApiError> {
    let round = RoundRequest {
        session_id: req.session_id,
        bet_amount: req.bet_amount,
        win_amount: req.win_amount,
        multiplier: req.multiplier,
        result_data: req.result_data,
        provider_round_id: req.provider_round_id,
        provider_serial: None,
    };

    let outcome = state
        .coordinator
        .record_round(round)
        .map_err(|e| ApiError::from_domain(request_id.0.clone(), e))?;

    Ok((StatusCode::CREATED, Json(outcome)))
}

// ---------------------------------------------------------------------------
// Jackpots
// ---------------------------------------------------------------------------

pub async fn get_jackpots_handler(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Json<JackpotsResponse>, ApiError> {
    let jackpots = state
        .jackpots
        .all()
        .map_err(|e| ApiError::from_domain(request_id.0.clone(), e))?;
    Ok(Json(JackpotsResponse {
        jackpots: jackpots.into_iter().map(Into::into).collect(),
    }))
}

pub async fn get_jackpot_wins_handler(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Query(query): Query<WinsQuery>,
) -> Result<Json<JackpotWinsPage>, ApiError> {
    let (wins, next_cursor) = state
        .jackpots
        .recent_wins(query.cursor.as_deref(), page_limit(query.limit))
        .map_err(|e| ApiError::from_domain(request_id.0.clone(), e))?;
    Ok(Json(JackpotWinsPage { wins, next_cursor }))
}

// ---------------------------------------------------------------------------
// Launch
// ---------------------------------------------------------------------------

pub async fn launch_handler(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Json(req): Json<LaunchRequest>,
) -> Result<Json<LaunchResponse>, ApiError> {
    MetricsRegistry::incr(&state.metrics.launch_requests_total);

    let currency = parse_currency(&request_id, &req.currency)?;
    let game = state
        .catalog
        .by_id(&req.game_id)
        .ok_or_else(|| {
            ApiError::not_found(
                request_id.0.clone(),
                format!("unknown game: {}", req.game_id),
            )
        })?
        .clone();

    // Reported balance is the wallet's current balance in the play currency.
    let wallet = state
        .ledger
        .wallet(&req.user_id)
        .map_err(|e| ApiError::from_domain(request_id.0.clone(), e))?;
    let credit_amount = wallet.balance(currency);

    let outcome = state
        .launch
        .launch(&req.user_id, &game, currency, credit_amount)
        .await
        .map_err(|e| ApiError::from_domain(request_id.0.clone(), e))?;

    Ok(Json(LaunchResponse {
        game_launch_url: outcome.game_launch_url,
        member_account: outcome.member_account,
    }))
}

// ---------------------------------------------------------------------------
// Operational
// ---------------------------------------------------------------------------

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: state.metrics.uptime_seconds(),
        estimated_keys: state.storage.estimated_keys(),
    })
}

pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let body = state.metrics.to_prometheus_format(&state.jackpots);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}
