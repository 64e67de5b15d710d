use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

use super::types::*;
use super::AppState;
use crate::db::EventFilter;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

const MAX_PAGE: i64 = 1000;

fn api_error(status: StatusCode, msg: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: msg.into(),
        }),
    )
}

fn internal(e: eyre::Report) -> (StatusCode, Json<ErrorResponse>) {
    tracing::error!(error = %e, "API query failed");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

// ============================================================
// Health
// ============================================================

pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    let chains = state.store.watermarks().await.map_err(internal)?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        chains,
    }))
}

// ============================================================
// Ledger
// ============================================================

pub async fn user_ledger(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserParams>,
) -> ApiResult<LedgerResponse> {
    let address = params.address.trim().to_lowercase();
    if address.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "address is required"));
    }

    match state.store.find_ledger(&address).await.map_err(internal)? {
        Some(ledger) => Ok(Json(ledger.into())),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("No ledger for address {}", address),
        )),
    }
}

// ============================================================
// Events
// ============================================================

pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventParams>,
) -> ApiResult<EventsResponse> {
    let filter = EventFilter {
        chain_id: params.chain_id,
        event_type: params.event_type,
        processed: params.processed,
        limit: params.limit.unwrap_or(100).clamp(1, MAX_PAGE),
        offset: params.offset.unwrap_or(0).max(0),
    };

    let events = state.store.list_events(&filter).await.map_err(internal)?;
    Ok(Json(EventsResponse {
        count: events.len(),
        events,
        as_of: chrono::Utc::now(),
    }))
}
