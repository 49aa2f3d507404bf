// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! API handlers for the query surface

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

use crate::api::types::*;
use crate::api::ApiState;
use crate::error::PointsError;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;
const DEFAULT_HISTORY_LIMIT: i64 = 100;
const MAX_HISTORY_LIMIT: i64 = 1_000;

pub fn create_api_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/balance/list", get(list_balances))
        .route("/api/balance/:chain_id/:address", get(get_balance))
        .route("/api/points/list", get(list_points))
        .route(
            "/api/points/history/:chain_id/:address",
            get(get_point_calculations),
        )
        .route("/api/points/:chain_id/:address", get(get_points))
        .route("/api/history/:chain_id/:address", get(get_history))
        .route("/api/transactions/recent", get(recent_transactions))
        .route("/api/stats", get(get_stats))
        .route("/api/recalculate", post(trigger_recalculate))
        .route("/health", get(health_check))
        .route("/metrics", get(export_metrics))
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "token-points-indexer"
    }))
}

/// Prometheus exposition endpoint
async fn export_metrics(State(state): State<Arc<ApiState>>) -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&state.registry.gather(), &mut buffer) {
        return ApiErrorResponse::internal(&format!("failed to encode metrics: {}", e))
            .into_response();
    }
    (
        StatusCode::OK,
        [("content-type", encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

async fn get_balance(
    State(state): State<Arc<ApiState>>,
    Path((chain_id, address)): Path<(String, String)>,
) -> Result<Json<BalanceResponse>, ApiErrorResponse> {
    let address = normalize_address(&address)?;

    let balance = state
        .balances
        .get(&chain_id, &address)
        .await
        .map_err(ApiErrorResponse::from_points_error)?;

    Ok(Json(BalanceResponse {
        chain_id,
        address,
        balance: balance
            .as_ref()
            .map(|b| b.balance.to_string())
            .unwrap_or_else(|| "0".to_string()),
        updated_at: balance.map(|b| b.updated_at),
    }))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    chain_id: String,
    page: Option<i64>,
    page_size: Option<i64>,
}

async fn list_balances(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Paged<BalanceItem>>, ApiErrorResponse> {
    let (page, page_size, offset) = pagination(params.page, params.page_size);

    let items = state
        .balances
        .list(&params.chain_id, offset, page_size)
        .await
        .map_err(ApiErrorResponse::from_points_error)?;
    let total = state
        .balances
        .count_by_chain(&params.chain_id)
        .await
        .map_err(ApiErrorResponse::from_points_error)?;

    Ok(Json(Paged {
        items: items
            .into_iter()
            .map(|b| BalanceItem {
                user_address: b.user_address,
                balance: b.balance.to_string(),
                updated_at: b.updated_at,
            })
            .collect(),
        total,
        page,
        page_size,
    }))
}

async fn get_points(
    State(state): State<Arc<ApiState>>,
    Path((chain_id, address)): Path<(String, String)>,
) -> Result<Json<PointsResponse>, ApiErrorResponse> {
    let address = normalize_address(&address)?;

    let points = state
        .points
        .get(&chain_id, &address)
        .await
        .map_err(ApiErrorResponse::from_points_error)?;

    Ok(Json(PointsResponse {
        chain_id,
        address,
        total_points: points
            .as_ref()
            .map(|p| p.total_points.to_string())
            .unwrap_or_else(|| "0".to_string()),
        last_calculated_at: points.and_then(|p| p.last_calculated_at),
    }))
}

async fn list_points(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Paged<PointsItem>>, ApiErrorResponse> {
    let (page, page_size, offset) = pagination(params.page, params.page_size);

    let items = state
        .points
        .list(&params.chain_id, offset, page_size)
        .await
        .map_err(ApiErrorResponse::from_points_error)?;
    let total = state
        .points
        .count_by_chain(&params.chain_id)
        .await
        .map_err(ApiErrorResponse::from_points_error)?;

    Ok(Json(Paged {
        items: items
            .into_iter()
            .map(|p| PointsItem {
                user_address: p.user_address,
                total_points: p.total_points.to_string(),
                last_calculated_at: p.last_calculated_at,
            })
            .collect(),
        total,
        page,
        page_size,
    }))
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<i64>,
}

async fn get_history(
    State(state): State<Arc<ApiState>>,
    Path((chain_id, address)): Path<(String, String)>,
    Query(params): Query<LimitParams>,
) -> Result<Json<HistoryResponse>, ApiErrorResponse> {
    let address = normalize_address(&address)?;
    let limit = clamp_limit(params.limit);

    let rows = state
        .history
        .by_user(&chain_id, &address, limit)
        .await
        .map_err(ApiErrorResponse::from_points_error)?;

    Ok(Json(HistoryResponse {
        chain_id,
        items: rows.into_iter().map(history_item).collect(),
    }))
}

async fn get_point_calculations(
    State(state): State<Arc<ApiState>>,
    Path((chain_id, address)): Path<(String, String)>,
    Query(params): Query<LimitParams>,
) -> Result<Json<CalculationsResponse>, ApiErrorResponse> {
    let address = normalize_address(&address)?;
    let limit = clamp_limit(params.limit);

    let calcs = state
        .calculations
        .by_user(&chain_id, &address, limit)
        .await
        .map_err(ApiErrorResponse::from_points_error)?;

    Ok(Json(CalculationsResponse {
        chain_id,
        address,
        items: calcs
            .into_iter()
            .map(|c| CalculationItem {
                period_start: c.period_start,
                period_end: c.period_end,
                points_earned: c.points_earned.to_string(),
            })
            .collect(),
    }))
}

#[derive(Debug, Deserialize)]
struct RecentParams {
    chain_id: String,
    limit: Option<i64>,
}

async fn recent_transactions(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<RecentParams>,
) -> Result<Json<HistoryResponse>, ApiErrorResponse> {
    let limit = clamp_limit(params.limit);

    let rows = state
        .history
        .recent(&params.chain_id, limit)
        .await
        .map_err(ApiErrorResponse::from_points_error)?;

    Ok(Json(HistoryResponse {
        chain_id: params.chain_id,
        items: rows.into_iter().map(history_item).collect(),
    }))
}

async fn get_stats(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<StatsResponse>, ApiErrorResponse> {
    let mut chains = Vec::with_capacity(state.chains.len());

    for chain in &state.chains {
        let holders = state
            .balances
            .count_by_chain(&chain.id)
            .await
            .map_err(ApiErrorResponse::from_points_error)?;
        let points_accounts = state
            .points
            .count_by_chain(&chain.id)
            .await
            .map_err(ApiErrorResponse::from_points_error)?;
        let history_rows = state
            .history
            .count_by_chain(&chain.id)
            .await
            .map_err(ApiErrorResponse::from_points_error)?;
        let last_processed_block = state
            .chain_states
            .last_processed_block(&chain.id)
            .await
            .map_err(ApiErrorResponse::from_points_error)?;

        chains.push(ChainStats {
            chain_id: chain.id.clone(),
            holders,
            points_accounts,
            history_rows,
            last_processed_block,
        });
    }

    Ok(Json(StatsResponse { chains }))
}

/// Synchronously re-run settlement for a period. Already-settled windows
/// no-op on their fingerprints, so this is safe to call repeatedly.
async fn trigger_recalculate(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<RecalculateRequest>,
) -> Result<Json<RecalculateResponse>, ApiErrorResponse> {
    state
        .scheduler
        .trigger_manual(&req.chain_id, req.period_start, req.period_end)
        .await
        .map_err(|e| match e {
            PointsError::ConfigLoad(msg) | PointsError::PointsCalculation(msg) => {
                ApiErrorResponse::bad_request(&msg)
            }
            other => ApiErrorResponse::internal(&other.to_string()),
        })?;

    Ok(Json(RecalculateResponse {
        status: "ok".to_string(),
        chain_id: req.chain_id,
        period_start: req.period_start,
        period_end: req.period_end,
    }))
}

fn history_item(row: token_points_schema::models::BalanceHistoryEntry) -> HistoryItem {
    HistoryItem {
        user_address: row.user_address,
        balance_before: row.balance_before.to_string(),
        balance_after: row.balance_after.to_string(),
        change_amount: row.change_amount.to_string(),
        change_type: row.change_type,
        tx_hash: row.tx_hash,
        block_number: row.block_number,
        timestamp: row.timestamp,
    }
}

/// Addresses are stored lowercased; accept checksummed input and validate
/// the 0x-prefixed 20-byte shape.
fn normalize_address(address: &str) -> Result<String, ApiErrorResponse> {
    let address = address.to_lowercase();
    let hex_part = address
        .strip_prefix("0x")
        .ok_or_else(|| ApiErrorResponse::bad_request("address must start with 0x"))?;
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ApiErrorResponse::bad_request(
            "address must be 20 bytes of hex",
        ));
    }
    Ok(address)
}

fn pagination(page: Option<i64>, page_size: Option<i64>) -> (i64, i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let page_size = page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    (page, page_size, (page - 1) * page_size)
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

/// API error response wrapper
pub(crate) struct ApiErrorResponse {
    status: StatusCode,
    body: Json<ApiError>,
}

impl ApiErrorResponse {
    fn new(status: StatusCode, error: &str, message: &str) -> Self {
        Self {
            status,
            body: Json(ApiError {
                error: error.to_string(),
                message: message.to_string(),
            }),
        }
    }

    fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    fn internal(message: &str) -> Self {
        error!("Internal error: {}", message);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    fn from_points_error(e: PointsError) -> Self {
        Self::internal(&e.to_string())
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.status, self.body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address_lowercases() {
        let normalized = normalize_address("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA").unwrap();
        assert_eq!(
            normalized,
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        );
    }

    #[test]
    fn test_normalize_address_rejects_missing_prefix() {
        assert!(normalize_address("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").is_err());
    }

    #[test]
    fn test_normalize_address_rejects_bad_length() {
        assert!(normalize_address("0x1234").is_err());
        assert!(normalize_address(&format!("0x{}", "a".repeat(41))).is_err());
    }

    #[test]
    fn test_normalize_address_rejects_non_hex() {
        assert!(normalize_address(&format!("0x{}", "g".repeat(40))).is_err());
    }

    #[test]
    fn test_pagination_defaults() {
        let (page, size, offset) = pagination(None, None);
        assert_eq!((page, size, offset), (1, DEFAULT_PAGE_SIZE, 0));
    }

    #[test]
    fn test_pagination_offsets() {
        let (page, size, offset) = pagination(Some(3), Some(50));
        assert_eq!((page, size, offset), (3, 50, 100));
    }

    #[test]
    fn test_pagination_clamps() {
        let (_, size, _) = pagination(Some(1), Some(10_000));
        assert_eq!(size, MAX_PAGE_SIZE);
        let (page, size, offset) = pagination(Some(-4), Some(0));
        assert_eq!((page, size, offset), (1, 1, 0));
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None), DEFAULT_HISTORY_LIMIT);
        assert_eq!(clamp_limit(Some(5)), 5);
        assert_eq!(clamp_limit(Some(100_000)), MAX_HISTORY_LIMIT);
    }

    #[test]
    fn test_api_error_response_bad_request() {
        let err = ApiErrorResponse::bad_request("bad address");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.body.0.error, "bad_request");
        assert_eq!(err.body.0.message, "bad address");
    }

    #[test]
    fn test_api_error_response_internal() {
        let err = ApiErrorResponse::internal("boom");
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body.0.error, "internal_error");
    }
}
