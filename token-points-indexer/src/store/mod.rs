// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Stateless store capabilities over the shared connection pool.
//!
//! Each store is a small `Clone` handle scoped to one entity. The balance
//! state machine composes the write paths of several entities inside a single
//! transaction; the free functions taking a connection exist for that.

mod balance;
mod calculation;
mod chain_state;
mod history;
mod points;

pub use balance::{upsert_balance, BalanceStore};
pub use calculation::{CalculationStore, CreateOutcome};
pub use chain_state::{advance_checkpoint, ChainStateStore};
pub use history::HistoryStore;
pub use points::PointsStore;

use crate::error::PointsError;

pub(crate) fn storage_err(e: anyhow::Error) -> PointsError {
    PointsError::Storage(e.to_string())
}
