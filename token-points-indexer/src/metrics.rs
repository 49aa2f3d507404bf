// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry, HistogramVec, IntCounterVec, IntGaugeVec, Registry,
};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct IndexerMetrics {
    /// Checkpoint per chain, as last visible in the database.
    pub last_processed_block: IntGaugeVec,
    pub events_processed: IntCounterVec,
    pub duplicate_events: IntCounterVec,
    pub parse_failures: IntCounterVec,
    pub reconciliations: IntCounterVec,
    /// Failed ingestion passes by chain and error type.
    pub batch_errors: IntCounterVec,
    pub queue_depth: IntGaugeVec,
    pub pull_interval_ms: IntGaugeVec,
    pub settlements: IntCounterVec,
    pub settlement_failures: IntCounterVec,
    pub sweep_duration_seconds: HistogramVec,
}

impl IndexerMetrics {
    pub fn new(registry: &Registry) -> Arc<Self> {
        Arc::new(Self {
            last_processed_block: register_int_gauge_vec_with_registry!(
                "points_last_processed_block",
                "Last processed block per chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            events_processed: register_int_counter_vec_with_registry!(
                "points_events_processed_total",
                "Transfer events applied to the balance state machine",
                &["chain"],
                registry,
            )
            .unwrap(),
            duplicate_events: register_int_counter_vec_with_registry!(
                "points_duplicate_events_total",
                "Transfer events skipped by the tx-hash idempotence barrier",
                &["chain"],
                registry,
            )
            .unwrap(),
            parse_failures: register_int_counter_vec_with_registry!(
                "points_parse_failures_total",
                "Logs that could not be parsed as Transfer events",
                &["chain"],
                registry,
            )
            .unwrap(),
            reconciliations: register_int_counter_vec_with_registry!(
                "points_reconciliations_total",
                "Negative-balance reconciliations against the live chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            batch_errors: register_int_counter_vec_with_registry!(
                "points_batch_errors_total",
                "Failed ingestion passes",
                &["chain", "error_type"],
                registry,
            )
            .unwrap(),
            queue_depth: register_int_gauge_vec_with_registry!(
                "points_event_queue_depth",
                "Pending events buffered between fetch and apply",
                &["chain"],
                registry,
            )
            .unwrap(),
            pull_interval_ms: register_int_gauge_vec_with_registry!(
                "points_pull_interval_ms",
                "Current (possibly adapted) poll interval",
                &["chain"],
                registry,
            )
            .unwrap(),
            settlements: register_int_counter_vec_with_registry!(
                "points_settlements_total",
                "Completed point settlements",
                &["chain"],
                registry,
            )
            .unwrap(),
            settlement_failures: register_int_counter_vec_with_registry!(
                "points_settlement_failures_total",
                "Per-user settlement failures during sweeps",
                &["chain"],
                registry,
            )
            .unwrap(),
            sweep_duration_seconds: register_histogram_vec_with_registry!(
                "points_sweep_duration_seconds",
                "Wall-clock duration of per-chain settlement sweeps",
                &["chain"],
                registry,
            )
            .unwrap(),
        })
    }

    pub fn new_for_testing() -> Arc<Self> {
        Self::new(&Registry::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        let registry = Registry::new();
        let metrics = IndexerMetrics::new(&registry);
        metrics.events_processed.with_label_values(&["eth"]).inc();
        metrics
            .last_processed_block
            .with_label_values(&["eth"])
            .set(42);

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "points_events_processed_total"));
        assert!(families
            .iter()
            .any(|f| f.get_name() == "points_last_processed_block"));
    }
}
