// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! REST API for the points indexer
//!
//! Read-side endpoints over balances, points, history and settlement
//! receipts, plus the manual recalculation trigger, health and Prometheus
//! metrics. All read operations are free of side effects.

mod handlers;
mod types;

pub use handlers::create_api_router;
pub use types::*;

use prometheus::Registry;
use std::sync::Arc;

use crate::config::ChainConfig;
use crate::scheduler::PointsScheduler;
use crate::store::{BalanceStore, CalculationStore, ChainStateStore, HistoryStore, PointsStore};

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub balances: BalanceStore,
    pub points: PointsStore,
    pub history: HistoryStore,
    pub calculations: CalculationStore,
    pub chain_states: ChainStateStore,
    pub scheduler: Arc<PointsScheduler>,
    pub chains: Vec<ChainConfig>,
    pub registry: Registry,
}

impl ApiState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        balances: BalanceStore,
        points: PointsStore,
        history: HistoryStore,
        calculations: CalculationStore,
        chain_states: ChainStateStore,
        scheduler: Arc<PointsScheduler>,
        chains: Vec<ChainConfig>,
        registry: Registry,
    ) -> Arc<Self> {
        Arc::new(Self {
            balances,
            points,
            history,
            calculations,
            chain_states,
            scheduler,
            chains,
            registry,
        })
    }
}
