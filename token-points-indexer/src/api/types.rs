// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! API request/response types

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use token_points_schema::models::ChangeType;

/// Structured error body: a stable slug plus a human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub chain_id: String,
    pub address: String,
    /// Token base units as a decimal string
    pub balance: String,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceItem {
    pub user_address: String,
    pub balance: String,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsResponse {
    pub chain_id: String,
    pub address: String,
    /// Decimal string with up to 18 fractional digits
    pub total_points: String,
    pub last_calculated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsItem {
    pub user_address: String,
    pub total_points: String,
    pub last_calculated_at: Option<NaiveDateTime>,
}

/// One page of a chain-scoped listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryItem {
    pub user_address: String,
    pub balance_before: String,
    pub balance_after: String,
    pub change_amount: String,
    pub change_type: ChangeType,
    pub tx_hash: String,
    pub block_number: i64,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub chain_id: String,
    pub items: Vec<HistoryItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationItem {
    pub period_start: NaiveDateTime,
    pub period_end: NaiveDateTime,
    pub points_earned: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationsResponse {
    pub chain_id: String,
    pub address: String,
    pub items: Vec<CalculationItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStats {
    pub chain_id: String,
    pub holders: i64,
    pub points_accounts: i64,
    pub history_rows: i64,
    pub last_processed_block: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub chains: Vec<ChainStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalculateRequest {
    pub chain_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalculateResponse {
    pub status: String,
    pub chain_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}
