// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Hourly settlement scheduler.
//!
//! Fires on a seconds-precision cron expression and settles the hour that
//! just closed, one transient task per enabled chain. Sweeps page through
//! all known holders; a failing user is logged and skipped. Overlapping
//! sweeps are safe: the settlement fingerprint turns the second pass into
//! no-ops.

use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone, Timelike, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ChainConfig;
use crate::error::{PointsError, PointsResult};
use crate::metrics::IndexerMetrics;
use crate::points::PointsEngine;
use crate::store::BalanceStore;

/// Holders are settled in pages of this size.
const SWEEP_PAGE_SIZE: i64 = 100;

pub struct PointsScheduler {
    engine: Arc<PointsEngine>,
    balances: BalanceStore,
    chains: Vec<ChainConfig>,
    schedule: Schedule,
    cron_expr: String,
    metrics: Arc<IndexerMetrics>,
}

impl PointsScheduler {
    pub fn new(
        engine: Arc<PointsEngine>,
        balances: BalanceStore,
        chains: Vec<ChainConfig>,
        cron_expr: &str,
        metrics: Arc<IndexerMetrics>,
    ) -> PointsResult<Self> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| {
            PointsError::ConfigLoad(format!("invalid cron expression '{}': {}", cron_expr, e))
        })?;
        Ok(Self {
            engine,
            balances,
            chains,
            schedule,
            cron_expr: cron_expr.to_string(),
            metrics,
        })
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("Points scheduler started ({})", self.cron_expr);

        loop {
            let Some(next_fire) = self.schedule.upcoming(Local).next() else {
                warn!("Cron schedule has no upcoming fire times, stopping scheduler");
                break;
            };
            let wait = (next_fire - Local::now())
                .to_std()
                .unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Points scheduler cancelled");
                    break;
                }
                _ = time::sleep(wait) => {
                    self.clone().fire();
                }
            }
        }

        info!("Points scheduler stopped");
    }

    /// Settle the hour that just closed across all enabled chains, one
    /// detached task per chain.
    fn fire(self: Arc<Self>) {
        let Some((period_start, period_end)) = current_hour_period(Local::now()) else {
            error!("Could not truncate current time to the hour, skipping sweep");
            return;
        };

        info!(
            "Starting settlement sweep for period [{} .. {})",
            period_start, period_end
        );

        for chain in self.chains.iter().filter(|c| c.enabled) {
            let scheduler = self.clone();
            let chain_id = chain.id.clone();
            tokio::spawn(async move {
                scheduler
                    .sweep_chain(&chain_id, period_start, period_end)
                    .await;
            });
        }
    }

    /// Page through every holder on one chain and settle the period.
    /// Per-user failures never abort the sweep.
    pub async fn sweep_chain(
        &self,
        chain_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) {
        let timer = self
            .metrics
            .sweep_duration_seconds
            .with_label_values(&[chain_id])
            .start_timer();

        let mut offset = 0i64;
        let mut settled = 0u64;
        let mut failures = 0u64;

        loop {
            let page = match self.balances.list(chain_id, offset, SWEEP_PAGE_SIZE).await {
                Ok(page) => page,
                Err(e) => {
                    error!("[{}] Failed to page holders at offset {}: {}", chain_id, offset, e);
                    break;
                }
            };
            if page.is_empty() {
                break;
            }
            let page_len = page.len() as i64;

            for balance in page {
                match self
                    .engine
                    .settle(chain_id, &balance.user_address, period_start, period_end)
                    .await
                {
                    Ok(_) => settled += 1,
                    Err(e) => {
                        failures += 1;
                        self.metrics
                            .settlement_failures
                            .with_label_values(&[chain_id])
                            .inc();
                        error!(
                            "[{}] Failed to settle {}: {} (sweep continues)",
                            chain_id, balance.user_address, e
                        );
                    }
                }
            }

            if page_len < SWEEP_PAGE_SIZE {
                break;
            }
            offset += SWEEP_PAGE_SIZE;
        }

        timer.observe_duration();
        info!(
            "[{}] Settlement sweep complete for [{} .. {}): {} settled, {} failures",
            chain_id, period_start, period_end, settled, failures
        );
    }

    /// Manual trigger: synchronously replay settlement windows covering
    /// `[period_start, period_end)` for one chain. Already-settled windows
    /// no-op on their fingerprints.
    pub async fn trigger_manual(
        &self,
        chain_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> PointsResult<()> {
        if !self.chains.iter().any(|c| c.id == chain_id) {
            return Err(PointsError::ConfigLoad(format!(
                "unknown chain: {}",
                chain_id
            )));
        }
        if period_end <= period_start {
            return Err(PointsError::PointsCalculation(
                "period_end must be after period_start".to_string(),
            ));
        }

        for (start, end) in hour_windows(period_start, period_end) {
            self.sweep_chain(chain_id, start, end).await;
        }
        Ok(())
    }
}

/// The settlement period for a sweep firing at `now`: the hour that just
/// closed, computed in local time.
fn current_hour_period(now: DateTime<Local>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let end = truncate_to_hour(now)?;
    let start = end - ChronoDuration::hours(1);
    Some((start.with_timezone(&Utc), end.with_timezone(&Utc)))
}

fn truncate_to_hour<Tz: TimeZone>(dt: DateTime<Tz>) -> Option<DateTime<Tz>> {
    dt.with_minute(0)?.with_second(0)?.with_nanosecond(0)
}

/// Split `[start, end)` into hour-sized settlement windows; the last window
/// is truncated at `end`.
fn hour_windows(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = (cursor + ChronoDuration::hours(1)).min(end);
        windows.push((cursor, next));
        cursor = next;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_truncate_to_hour() {
        let dt = Utc.with_ymd_and_hms(2025, 7, 10, 14, 35, 42).unwrap();
        let truncated = truncate_to_hour(dt).unwrap();
        assert_eq!(
            truncated,
            Utc.with_ymd_and_hms(2025, 7, 10, 14, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_truncate_is_idempotent() {
        let dt = Utc.with_ymd_and_hms(2025, 7, 10, 14, 0, 0).unwrap();
        assert_eq!(truncate_to_hour(dt).unwrap(), dt);
    }

    #[test]
    fn test_hour_windows_single_exact_hour() {
        let windows = hour_windows(utc(0), utc(3600));
        assert_eq!(windows, vec![(utc(0), utc(3600))]);
    }

    #[test]
    fn test_hour_windows_multiple_with_partial_tail() {
        let windows = hour_windows(utc(0), utc(9000));
        assert_eq!(
            windows,
            vec![
                (utc(0), utc(3600)),
                (utc(3600), utc(7200)),
                (utc(7200), utc(9000)),
            ]
        );
    }

    #[test]
    fn test_hour_windows_empty_range() {
        assert!(hour_windows(utc(3600), utc(3600)).is_empty());
        assert!(hour_windows(utc(3600), utc(0)).is_empty());
    }

    #[test]
    fn test_windows_are_contiguous() {
        let windows = hour_windows(utc(100), utc(50_000));
        for pair in windows.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        assert_eq!(windows.first().unwrap().0, utc(100));
        assert_eq!(windows.last().unwrap().1, utc(50_000));
    }

    #[test]
    fn test_default_cron_expression_parses() {
        let schedule = Schedule::from_str("0 0 * * * *").unwrap();
        let mut fires = schedule.upcoming(Utc);
        let first = fires.next().unwrap();
        assert_eq!(first.minute(), 0);
        assert_eq!(first.second(), 0);
    }
}
