// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Append-only balance history queries. Rows are inserted by the balance
//! state machine only; everything here is read-side.

use chrono::NaiveDateTime;
use diesel::dsl::count_star;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use token_points_pg_db::Db;
use token_points_schema::models::BalanceHistoryEntry;
use token_points_schema::schema::balance_history;

use super::storage_err;
use crate::error::PointsResult;

#[derive(Clone)]
pub struct HistoryStore {
    db: Db,
}

impl HistoryStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Pre-check for the tx_hash idempotence barrier. The unique index is
    /// the authority; this avoids doing work for known replays.
    pub async fn exists_by_tx_hash(&self, tx_hash: &str) -> PointsResult<bool> {
        use balance_history::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        let found: Option<i64> = dsl::balance_history
            .filter(dsl::tx_hash.eq(tx_hash))
            .select(dsl::id)
            .first(&mut conn)
            .await
            .optional()?;

        Ok(found.is_some())
    }

    /// History rows for one user inside `[start, end)`, oldest first.
    /// Ties on timestamp keep insertion order via the id column.
    pub async fn user_history_in_range(
        &self,
        chain: &str,
        user: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> PointsResult<Vec<BalanceHistoryEntry>> {
        use balance_history::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        let rows = dsl::balance_history
            .filter(dsl::chain_id.eq(chain))
            .filter(dsl::user_address.eq(user))
            .filter(dsl::timestamp.ge(start))
            .filter(dsl::timestamp.lt(end))
            .order((dsl::timestamp.asc(), dsl::id.asc()))
            .select(BalanceHistoryEntry::as_select())
            .load(&mut conn)
            .await?;

        Ok(rows)
    }

    /// Newest history rows for one user.
    pub async fn by_user(
        &self,
        chain: &str,
        user: &str,
        limit: i64,
    ) -> PointsResult<Vec<BalanceHistoryEntry>> {
        use balance_history::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        let rows = dsl::balance_history
            .filter(dsl::chain_id.eq(chain))
            .filter(dsl::user_address.eq(user))
            .order((dsl::timestamp.desc(), dsl::id.desc()))
            .limit(limit)
            .select(BalanceHistoryEntry::as_select())
            .load(&mut conn)
            .await?;

        Ok(rows)
    }

    /// Newest history rows across a whole chain.
    pub async fn recent(&self, chain: &str, limit: i64) -> PointsResult<Vec<BalanceHistoryEntry>> {
        use balance_history::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        let rows = dsl::balance_history
            .filter(dsl::chain_id.eq(chain))
            .order((dsl::timestamp.desc(), dsl::id.desc()))
            .limit(limit)
            .select(BalanceHistoryEntry::as_select())
            .load(&mut conn)
            .await?;

        Ok(rows)
    }

    pub async fn count_by_chain(&self, chain: &str) -> PointsResult<i64> {
        use balance_history::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        let count = dsl::balance_history
            .filter(dsl::chain_id.eq(chain))
            .select(count_star())
            .first(&mut conn)
            .await?;

        Ok(count)
    }
}
