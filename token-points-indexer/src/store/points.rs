// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Accumulated points per (chain, address).

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use diesel::dsl::count_star;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use token_points_pg_db::Db;
use token_points_schema::models::UserPoints;
use token_points_schema::schema::user_points;

use super::storage_err;
use crate::error::PointsResult;

#[derive(Clone)]
pub struct PointsStore {
    db: Db,
}

impl PointsStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn get(&self, chain: &str, user: &str) -> PointsResult<Option<UserPoints>> {
        use user_points::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        let points = dsl::user_points
            .filter(dsl::chain_id.eq(chain))
            .filter(dsl::user_address.eq(user))
            .select(UserPoints::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        Ok(points)
    }

    /// Atomically add earned points to the running total.
    /// `INSERT ... ON CONFLICT DO UPDATE SET total = total + excluded.total`.
    pub async fn add_points(
        &self,
        chain: &str,
        user: &str,
        earned: &BigDecimal,
        calculated_at: NaiveDateTime,
    ) -> PointsResult<()> {
        use diesel::dsl::now;
        use diesel::upsert::excluded;
        use user_points::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        diesel::insert_into(dsl::user_points)
            .values((
                dsl::chain_id.eq(chain),
                dsl::user_address.eq(user),
                dsl::total_points.eq(earned),
                dsl::last_calculated_at.eq(calculated_at),
                dsl::updated_at.eq(now),
            ))
            .on_conflict((dsl::chain_id, dsl::user_address))
            .do_update()
            .set((
                dsl::total_points.eq(dsl::total_points + excluded(dsl::total_points)),
                dsl::last_calculated_at.eq(excluded(dsl::last_calculated_at)),
                dsl::updated_at.eq(now),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    pub async fn list(
        &self,
        chain: &str,
        offset: i64,
        limit: i64,
    ) -> PointsResult<Vec<UserPoints>> {
        use user_points::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        let points = dsl::user_points
            .filter(dsl::chain_id.eq(chain))
            .order(dsl::total_points.desc())
            .offset(offset)
            .limit(limit)
            .select(UserPoints::as_select())
            .load(&mut conn)
            .await?;

        Ok(points)
    }

    pub async fn count_by_chain(&self, chain: &str) -> PointsResult<i64> {
        use user_points::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        let count = dsl::user_points
            .filter(dsl::chain_id.eq(chain))
            .select(count_star())
            .first(&mut conn)
            .await?;

        Ok(count)
    }
}
