// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Model structs for the token-points tables.

use crate::schema::{
    balance_history, chain_states, point_calculations, user_balances, user_points,
};
use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use diesel::{Insertable, Queryable, Selectable};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Kind of balance change recorded in `balance_history`.
///
/// `Mint` is a transfer from the zero address, `Burn` a transfer to it;
/// everything else, including the recipient side of a mint-like routing
/// through a non-zero address, is `Transfer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Transfer,
    Mint,
    Burn,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Transfer => "transfer",
            ChangeType::Mint => "mint",
            ChangeType::Burn => "burn",
        }
    }
}

impl ToSql<Text, Pg> for ChangeType {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for ChangeType {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        match bytes.as_bytes() {
            b"transfer" => Ok(ChangeType::Transfer),
            b"mint" => Ok(ChangeType::Mint),
            b"burn" => Ok(ChangeType::Burn),
            other => Err(format!(
                "Unrecognized change_type: {}",
                String::from_utf8_lossy(other)
            )
            .into()),
        }
    }
}

/// Durable per-chain ingestion checkpoint.
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = chain_states)]
#[diesel(check_for_backend(Pg))]
pub struct ChainState {
    pub id: i64,
    pub chain_id: String,
    pub last_processed_block: i64,
    pub updated_at: NaiveDateTime,
}

/// One immutable row in the append-only balance log.
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = balance_history)]
#[diesel(check_for_backend(Pg))]
pub struct BalanceHistoryEntry {
    pub id: i64,
    pub chain_id: String,
    pub user_address: String,
    pub balance_before: BigDecimal,
    pub balance_after: BigDecimal,
    pub change_amount: BigDecimal,
    pub change_type: ChangeType,
    pub tx_hash: String,
    pub block_number: i64,
    pub timestamp: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = balance_history)]
pub struct NewBalanceHistoryEntry {
    pub chain_id: String,
    pub user_address: String,
    pub balance_before: BigDecimal,
    pub balance_after: BigDecimal,
    pub change_amount: BigDecimal,
    pub change_type: ChangeType,
    pub tx_hash: String,
    pub block_number: i64,
    pub timestamp: NaiveDateTime,
}

/// Current balance per (chain, address).
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = user_balances)]
#[diesel(check_for_backend(Pg))]
pub struct UserBalance {
    pub id: i64,
    pub chain_id: String,
    pub user_address: String,
    pub balance: BigDecimal,
    pub updated_at: NaiveDateTime,
}

/// Accumulated points per (chain, address).
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = user_points)]
#[diesel(check_for_backend(Pg))]
pub struct UserPoints {
    pub id: i64,
    pub chain_id: String,
    pub user_address: String,
    pub total_points: BigDecimal,
    pub last_calculated_at: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
}

/// Settlement receipt; `calculation_hash` is the exactly-once barrier.
#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = point_calculations)]
#[diesel(check_for_backend(Pg))]
pub struct PointCalculation {
    pub id: i64,
    pub chain_id: String,
    pub user_address: String,
    pub period_start: NaiveDateTime,
    pub period_end: NaiveDateTime,
    pub points_earned: BigDecimal,
    pub calculation_hash: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = point_calculations)]
pub struct NewPointCalculation {
    pub chain_id: String,
    pub user_address: String,
    pub period_start: NaiveDateTime,
    pub period_end: NaiveDateTime,
    pub points_earned: BigDecimal,
    pub calculation_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_type_as_str() {
        assert_eq!(ChangeType::Transfer.as_str(), "transfer");
        assert_eq!(ChangeType::Mint.as_str(), "mint");
        assert_eq!(ChangeType::Burn.as_str(), "burn");
    }

    #[test]
    fn test_change_type_serde_round_trip() {
        for (ty, json) in [
            (ChangeType::Transfer, "\"transfer\""),
            (ChangeType::Mint, "\"mint\""),
            (ChangeType::Burn, "\"burn\""),
        ] {
            assert_eq!(serde_json::to_string(&ty).unwrap(), json);
            let back: ChangeType = serde_json::from_str(json).unwrap();
            assert_eq!(back, ty);
        }
    }
}
