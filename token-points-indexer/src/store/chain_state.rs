// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Durable per-chain checkpoint ("last processed block").
//!
//! The checkpoint only moves forward: the upsert carries a
//! `WHERE last_processed_block < excluded` guard, so replayed or
//! out-of-order advances are no-ops.

use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, RunQueryDsl};
use token_points_pg_db::Db;
use token_points_schema::models::ChainState;
use token_points_schema::schema::chain_states;

use super::storage_err;
use crate::error::PointsResult;

#[derive(Clone)]
pub struct ChainStateStore {
    db: Db,
}

impl ChainStateStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Last processed block for a chain; 0 when the chain has never run.
    pub async fn last_processed_block(&self, chain: &str) -> PointsResult<i64> {
        use chain_states::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        let result: Option<i64> = dsl::chain_states
            .filter(dsl::chain_id.eq(chain))
            .select(dsl::last_processed_block)
            .first(&mut conn)
            .await
            .optional()?;

        Ok(result.unwrap_or(0))
    }

    pub async fn state(&self, chain: &str) -> PointsResult<Option<ChainState>> {
        use chain_states::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        let state = dsl::chain_states
            .filter(dsl::chain_id.eq(chain))
            .select(ChainState::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        Ok(state)
    }

    /// Advance the checkpoint; monotonic, so a smaller block is a no-op.
    pub async fn advance(&self, chain: &str, block: i64) -> PointsResult<()> {
        let mut conn = self.db.connect().await.map_err(storage_err)?;
        advance_checkpoint(&mut *conn, chain, block).await?;
        Ok(())
    }
}

/// Monotonic checkpoint upsert, usable inside a larger transaction. Returns
/// the raw diesel error so transactional callers can inspect the kind.
pub async fn advance_checkpoint<C>(
    conn: &mut C,
    chain: &str,
    block: i64,
) -> Result<(), diesel::result::Error>
where
    C: AsyncConnection<Backend = diesel::pg::Pg>,
{
    use chain_states::dsl;
    use diesel::dsl::now;

    diesel::insert_into(dsl::chain_states)
        .values((
            dsl::chain_id.eq(chain),
            dsl::last_processed_block.eq(block),
            dsl::updated_at.eq(now),
        ))
        .on_conflict(dsl::chain_id)
        .do_update()
        .set((
            dsl::last_processed_block.eq(block),
            dsl::updated_at.eq(now),
        ))
        .filter(dsl::last_processed_block.lt(block))
        .execute(conn)
        .await?;

    Ok(())
}
