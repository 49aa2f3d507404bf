// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The balance state machine.
//!
//! Applies parsed `Transfer` events to per-address balances, appends the
//! history rows, and advances the chain checkpoint — all inside a single
//! database transaction per event. Idempotence is anchored on the
//! `(tx_hash, user_address)` uniqueness of the history table: the pre-check
//! is an optimization, the constraint violation is the authority and is
//! translated to [`ProcessOutcome::Duplicate`].
//!
//! When the local view would go negative (ingestion started after the
//! address already held tokens), the live on-chain balance replaces the
//! local one; this reconciliation resets the history stream visibly and is
//! logged prominently.

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use ethers::types::Address;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use token_points_pg_db::Db;
use token_points_schema::models::NewBalanceHistoryEntry;
use token_points_schema::schema::balance_history;

use crate::chain_client::ChainClient;
use crate::error::{PointsError, PointsResult};
use crate::events::{address_hex, u256_to_bigdecimal, TransferEvent};
use crate::metrics::IndexerMetrics;
use crate::store::{advance_checkpoint, upsert_balance, BalanceStore, HistoryStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Applied,
    /// The event's transaction hash was seen before; no effects.
    Duplicate,
}

pub struct BalanceProcessor {
    db: Db,
    balances: BalanceStore,
    history: HistoryStore,
    metrics: Arc<IndexerMetrics>,
    // Serializes all balance mutation in this process. Listeners are
    // per-chain single-writer already; this prevents cross-chain
    // interleaving on the shared pool.
    apply_lock: Mutex<()>,
}

impl BalanceProcessor {
    pub fn new(db: Db, metrics: Arc<IndexerMetrics>) -> Self {
        Self {
            balances: BalanceStore::new(db.clone()),
            history: HistoryStore::new(db.clone()),
            db,
            metrics,
            apply_lock: Mutex::new(()),
        }
    }

    /// Apply one transfer event. On `Applied`, history rows exist for every
    /// affected side, balances are upserted and the checkpoint covers
    /// `event.block_number`. On `Duplicate` or error, nothing changed.
    pub async fn process_transfer(
        &self,
        chain_id: &str,
        event: &TransferEvent,
        timestamp: NaiveDateTime,
        client: &ChainClient,
    ) -> PointsResult<ProcessOutcome> {
        let _guard = self.apply_lock.lock().await;

        let tx_hash = event.tx_hash_hex();
        if self.history.exists_by_tx_hash(&tx_hash).await? {
            debug!("[{}] Transaction {} already processed", chain_id, tx_hash);
            self.metrics
                .duplicate_events
                .with_label_values(&[chain_id])
                .inc();
            return Ok(ProcessOutcome::Duplicate);
        }

        // Plan both sides before touching the database: the sender unless it
        // is the zero address (mint), the recipient unless it is the zero
        // address (burn) or the self-transfer case.
        let mut rows = Vec::with_capacity(2);
        if !event.from.is_zero() {
            rows.push(
                self.plan_side(chain_id, event.from, event, timestamp, client)
                    .await?,
            );
        }
        if event.to != event.from && !event.to.is_zero() {
            rows.push(
                self.plan_side(chain_id, event.to, event, timestamp, client)
                    .await?,
            );
        }

        let checkpoint_block = event.block_number as i64;
        let mut conn = self
            .db
            .connect()
            .await
            .map_err(|e| PointsError::Storage(e.to_string()))?;

        let result = (&mut **conn)
            .transaction::<(), DieselError, _>(|conn| {
                let rows = &rows;
                async move {
                    for row in rows {
                        diesel::insert_into(balance_history::table)
                            .values(row)
                            .execute(conn)
                            .await?;
                        upsert_balance(conn, &row.chain_id, &row.user_address, &row.balance_after)
                            .await?;
                    }
                    advance_checkpoint(conn, chain_id, checkpoint_block).await?;
                    Ok(())
                }
                .scope_boxed()
            })
            .await;

        match result {
            Ok(()) => {
                for row in &rows {
                    info!(
                        "[{}] Balance updated: user={}, before={}, after={}, type={:?}, block={}",
                        chain_id,
                        row.user_address,
                        row.balance_before,
                        row.balance_after,
                        row.change_type,
                        row.block_number,
                    );
                }
                self.metrics
                    .events_processed
                    .with_label_values(&[chain_id])
                    .inc();
                Ok(ProcessOutcome::Applied)
            }
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                // Lost the race against an earlier delivery of the same
                // transaction; the constraint is the authoritative barrier.
                debug!(
                    "[{}] Transaction {} hit the idempotence barrier",
                    chain_id, tx_hash
                );
                self.metrics
                    .duplicate_events
                    .with_label_values(&[chain_id])
                    .inc();
                Ok(ProcessOutcome::Duplicate)
            }
            Err(e) => Err(PointsError::BalanceUpdate(e.to_string())),
        }
    }

    /// Compute the history row for one side of the event, running the
    /// reconciliation path when the derived balance would be negative.
    async fn plan_side(
        &self,
        chain_id: &str,
        user: Address,
        event: &TransferEvent,
        timestamp: NaiveDateTime,
        client: &ChainClient,
    ) -> PointsResult<NewBalanceHistoryEntry> {
        let user_hex = address_hex(user);

        let mut balance_before = self
            .balances
            .get(chain_id, &user_hex)
            .await?
            .map(|b| b.balance)
            .unwrap_or_else(|| BigDecimal::from(0));

        let change_amount = event.change_amount(user);
        let mut balance_after = &balance_before + &change_amount;

        if balance_after < BigDecimal::from(0) {
            warn!(
                "[{}] RECONCILIATION: negative derived balance for {} (before={}, change={}), \
                 syncing from chain",
                chain_id, user_hex, balance_before, change_amount,
            );
            self.metrics
                .reconciliations
                .with_label_values(&[chain_id])
                .inc();

            let onchain = client.token_balance(user).await.map_err(|e| {
                PointsError::BalanceUpdate(format!(
                    "negative balance for {} and live lookup failed: {}",
                    user_hex, e
                ))
            })?;
            let onchain = u256_to_bigdecimal(onchain);
            let resynced = &onchain + &change_amount;

            if resynced < BigDecimal::from(0) {
                return Err(PointsError::NegativeBalance {
                    address: user_hex,
                    onchain_balance: onchain.to_string(),
                    change_amount: change_amount.to_string(),
                });
            }

            warn!(
                "[{}] RECONCILIATION: reset {} from on-chain balance {} (local view discarded)",
                chain_id, user_hex, onchain,
            );
            balance_before = onchain;
            balance_after = resynced;
        }

        Ok(NewBalanceHistoryEntry {
            chain_id: chain_id.to_string(),
            user_address: user_hex,
            balance_before,
            balance_after,
            change_amount,
            change_type: event.change_type(),
            tx_hash: event.tx_hash_hex(),
            block_number: event.block_number as i64,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{H256, U256};
    use token_points_schema::models::ChangeType;

    fn event(from: Address, to: Address, value: u64) -> TransferEvent {
        TransferEvent {
            from,
            to,
            value: U256::from(value),
            tx_hash: H256::repeat_byte(0x42),
            block_number: 100,
            log_index: 0,
        }
    }

    /// The set of affected sides mirrors the application rules: zero
    /// addresses and self-transfers collapse to a single side.
    fn affected_sides(event: &TransferEvent) -> Vec<Address> {
        let mut sides = Vec::new();
        if !event.from.is_zero() {
            sides.push(event.from);
        }
        if event.to != event.from && !event.to.is_zero() {
            sides.push(event.to);
        }
        sides
    }

    #[test]
    fn test_mint_affects_recipient_only() {
        let ev = event(Address::zero(), Address::repeat_byte(2), 100);
        assert_eq!(affected_sides(&ev), vec![Address::repeat_byte(2)]);
        assert_eq!(ev.change_type(), ChangeType::Mint);
    }

    #[test]
    fn test_burn_affects_sender_only() {
        let ev = event(Address::repeat_byte(1), Address::zero(), 100);
        assert_eq!(affected_sides(&ev), vec![Address::repeat_byte(1)]);
        assert_eq!(ev.change_type(), ChangeType::Burn);
    }

    #[test]
    fn test_transfer_affects_both_sides() {
        let ev = event(Address::repeat_byte(1), Address::repeat_byte(2), 100);
        assert_eq!(
            affected_sides(&ev),
            vec![Address::repeat_byte(1), Address::repeat_byte(2)]
        );
    }

    #[test]
    fn test_self_transfer_affects_one_side() {
        let ev = event(Address::repeat_byte(1), Address::repeat_byte(1), 100);
        assert_eq!(affected_sides(&ev), vec![Address::repeat_byte(1)]);
    }

    #[test]
    fn test_derived_balances() {
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);
        let ev = event(a, b, 40);

        let before_a = BigDecimal::from(100);
        let after_a = &before_a + ev.change_amount(a);
        assert_eq!(after_a, BigDecimal::from(60));

        let before_b = BigDecimal::from(0);
        let after_b = &before_b + ev.change_amount(b);
        assert_eq!(after_b, BigDecimal::from(40));
    }

    /// Reconciliation arithmetic: an absent local balance with an outgoing
    /// transfer adopts the on-chain balance as `balance_before`.
    #[test]
    fn test_reconciliation_arithmetic() {
        let a = Address::repeat_byte(1);
        let ev = event(a, Address::repeat_byte(2), 50);

        let local = BigDecimal::from(0);
        let derived = &local + ev.change_amount(a);
        assert!(derived < BigDecimal::from(0));

        let onchain = BigDecimal::from(200);
        let resynced = &onchain + ev.change_amount(a);
        assert_eq!(resynced, BigDecimal::from(150));
        assert!(resynced >= BigDecimal::from(0));

        // On-chain balance too small: the event must be rejected.
        let too_small = BigDecimal::from(30);
        let still_negative = &too_small + ev.change_amount(a);
        assert!(still_negative < BigDecimal::from(0));
    }
}
