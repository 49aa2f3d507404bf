// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Current balance per (chain, address).

use bigdecimal::BigDecimal;
use diesel::dsl::count_star;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, RunQueryDsl};
use token_points_pg_db::Db;
use token_points_schema::models::UserBalance;
use token_points_schema::schema::user_balances;

use super::storage_err;
use crate::error::PointsResult;

#[derive(Clone)]
pub struct BalanceStore {
    db: Db,
}

impl BalanceStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn get(&self, chain: &str, user: &str) -> PointsResult<Option<UserBalance>> {
        use user_balances::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        let balance = dsl::user_balances
            .filter(dsl::chain_id.eq(chain))
            .filter(dsl::user_address.eq(user))
            .select(UserBalance::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        Ok(balance)
    }

    /// One page of balances for a chain, ordered by address for stable
    /// pagination across sweep runs.
    pub async fn list(
        &self,
        chain: &str,
        offset: i64,
        limit: i64,
    ) -> PointsResult<Vec<UserBalance>> {
        use user_balances::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        let balances = dsl::user_balances
            .filter(dsl::chain_id.eq(chain))
            .order(dsl::user_address.asc())
            .offset(offset)
            .limit(limit)
            .select(UserBalance::as_select())
            .load(&mut conn)
            .await?;

        Ok(balances)
    }

    pub async fn count_by_chain(&self, chain: &str) -> PointsResult<i64> {
        use user_balances::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        let count = dsl::user_balances
            .filter(dsl::chain_id.eq(chain))
            .select(count_star())
            .first(&mut conn)
            .await?;

        Ok(count)
    }
}

/// Upsert the current balance, usable inside a larger transaction. Returns
/// the raw diesel error so transactional callers can inspect the kind.
pub async fn upsert_balance<C>(
    conn: &mut C,
    chain: &str,
    user: &str,
    balance: &BigDecimal,
) -> Result<(), diesel::result::Error>
where
    C: AsyncConnection<Backend = diesel::pg::Pg>,
{
    use diesel::dsl::now;
    use diesel::upsert::excluded;
    use user_balances::dsl;

    diesel::insert_into(dsl::user_balances)
        .values((
            dsl::chain_id.eq(chain),
            dsl::user_address.eq(user),
            dsl::balance.eq(balance),
            dsl::updated_at.eq(now),
        ))
        .on_conflict((dsl::chain_id, dsl::user_address))
        .do_update()
        .set((
            dsl::balance.eq(excluded(dsl::balance)),
            dsl::updated_at.eq(now),
        ))
        .execute(conn)
        .await?;

    Ok(())
}
