// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Time-weighted point settlement.
//!
//! One settlement integrates a user's balance history over a bounded period:
//! each history row opens a segment at its `balance_after`, the last segment
//! runs to the period end, and every segment earns
//! `balance × rate × hours held`. The interval before the first in-period
//! event is zero-weighted; balance carried into the period from before its
//! start does not earn points.
//!
//! Exactly-once is anchored on the settlement fingerprint: the receipt row
//! is written before the running total is touched, so a crash between the
//! two never double-credits — it leaves a receipt whose points can be
//! re-summed out of band.

use bigdecimal::{BigDecimal, RoundingMode, Zero};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

use token_points_schema::models::NewPointCalculation;

use crate::error::{PointsError, PointsResult};
use crate::metrics::IndexerMetrics;
use crate::store::{CalculationStore, CreateOutcome, HistoryStore, PointsStore};

/// Stored point values carry 18 fractional digits.
const POINTS_SCALE: i64 = 18;

pub struct PointsEngine {
    history: HistoryStore,
    points: PointsStore,
    calculations: CalculationStore,
    rate: BigDecimal,
    metrics: Arc<IndexerMetrics>,
}

impl PointsEngine {
    pub fn new(
        history: HistoryStore,
        points: PointsStore,
        calculations: CalculationStore,
        rate: BigDecimal,
        metrics: Arc<IndexerMetrics>,
    ) -> Self {
        Self {
            history,
            points,
            calculations,
            rate,
            metrics,
        }
    }

    /// Settle one (chain, user, period). Returns the points earned, or zero
    /// without side effects when this period was already settled.
    pub async fn settle(
        &self,
        chain_id: &str,
        user: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> PointsResult<BigDecimal> {
        let hash = CalculationStore::fingerprint(chain_id, user, period_start, period_end);

        if self.calculations.exists_by_hash(&hash).await? {
            debug!(
                "[{}] Settlement already exists for {} ({})",
                chain_id, user, hash
            );
            return Ok(BigDecimal::zero());
        }

        let rows = self
            .history
            .user_history_in_range(
                chain_id,
                user,
                period_start.naive_utc(),
                period_end.naive_utc(),
            )
            .await?;

        let segments: Vec<(NaiveDateTime, BigDecimal)> = rows
            .into_iter()
            .map(|r| (r.timestamp, r.balance_after))
            .collect();

        let earned = integrate_balance_history(&segments, period_end.naive_utc(), &self.rate)
            .with_scale_round(POINTS_SCALE, RoundingMode::HalfUp);

        // The receipt is the replay barrier and is written even for zero
        // earned points, so an empty period is not re-examined every sweep.
        let receipt = NewPointCalculation {
            chain_id: chain_id.to_string(),
            user_address: user.to_string(),
            period_start: period_start.naive_utc(),
            period_end: period_end.naive_utc(),
            points_earned: earned.clone(),
            calculation_hash: hash,
        };

        match self.calculations.create(&receipt).await? {
            CreateOutcome::AlreadyExists => {
                // A concurrent sweep settled this period between our
                // pre-check and insert.
                debug!(
                    "[{}] Concurrent settlement for {} [{} .. {})",
                    chain_id, user, period_start, period_end
                );
                return Ok(BigDecimal::zero());
            }
            CreateOutcome::Created => {}
        }

        if let Err(e) = self
            .points
            .add_points(chain_id, user, &earned, period_end.naive_utc())
            .await
        {
            // The receipt already exists, so the settlement stands and will
            // not be retried; the total needs out-of-band re-summing.
            error!(
                "[{}] Settlement recorded but total update failed for {}: {}",
                chain_id, user, e
            );
            return Err(PointsError::PointsCalculation(format!(
                "recorded settlement for {} but failed to add points: {}",
                user, e
            )));
        }

        self.metrics
            .settlements
            .with_label_values(&[chain_id])
            .inc();
        info!(
            "[{}] Points settled: user={}, earned={}, period=[{} .. {})",
            chain_id, user, earned, period_start, period_end
        );

        Ok(earned)
    }
}

/// Integrate `(timestamp, balance_after)` pairs over a period.
///
/// Segment i spans from event i to event i+1 at event i's resulting balance;
/// the final segment runs to `period_end`. An empty history earns zero.
pub fn integrate_balance_history(
    history: &[(NaiveDateTime, BigDecimal)],
    period_end: NaiveDateTime,
    rate: &BigDecimal,
) -> BigDecimal {
    let Some(((first_ts, first_balance), rest)) = history.split_first() else {
        return BigDecimal::zero();
    };

    let mut total = BigDecimal::zero();
    let mut current_ts = *first_ts;
    let mut current_balance = first_balance;

    for (ts, balance_after) in rest {
        total += segment_points(current_balance, current_ts, *ts, rate);
        current_ts = *ts;
        current_balance = balance_after;
    }

    if current_ts < period_end {
        total += segment_points(current_balance, current_ts, period_end, rate);
    }

    total
}

/// `balance × rate × hours`, with the duration taken in minutes and divided
/// by 60.
fn segment_points(
    balance: &BigDecimal,
    from: NaiveDateTime,
    to: NaiveDateTime,
    rate: &BigDecimal,
) -> BigDecimal {
    let seconds = (to - from).num_seconds();
    if seconds <= 0 {
        return BigDecimal::zero();
    }
    let minutes = BigDecimal::from(seconds) / BigDecimal::from(60);
    let hours = minutes / BigDecimal::from(60);
    balance * rate * hours
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn ts(secs: i64) -> NaiveDateTime {
        Utc.timestamp_opt(secs, 0).unwrap().naive_utc()
    }

    fn rate() -> BigDecimal {
        BigDecimal::from_str("0.01").unwrap()
    }

    #[test]
    fn test_empty_history_earns_zero() {
        let earned = integrate_balance_history(&[], ts(3600), &rate());
        assert_eq!(earned, BigDecimal::zero());
    }

    /// Mint 100 at t=0, period [0, 3600): 100 × 0.01 × 1h = 1.0.
    #[test]
    fn test_single_mint_full_hour() {
        let history = vec![(ts(0), BigDecimal::from(100))];
        let earned = integrate_balance_history(&history, ts(3600), &rate());
        assert_eq!(earned, BigDecimal::from_str("1.0").unwrap());
    }

    /// Mint 100 at t=0, transfer 40 away at t=1800, period [0, 3600):
    /// 100 × 0.5h × 0.01 + 60 × 0.5h × 0.01 = 0.80.
    #[test]
    fn test_sender_two_segments() {
        let history = vec![
            (ts(0), BigDecimal::from(100)),
            (ts(1800), BigDecimal::from(60)),
        ];
        let earned = integrate_balance_history(&history, ts(3600), &rate());
        assert_eq!(earned, BigDecimal::from_str("0.80").unwrap());
    }

    /// The recipient of the t=1800 transfer holds 40 for half an hour: 0.20.
    #[test]
    fn test_recipient_half_hour() {
        let history = vec![(ts(1800), BigDecimal::from(40))];
        let earned = integrate_balance_history(&history, ts(3600), &rate());
        assert_eq!(earned, BigDecimal::from_str("0.20").unwrap());
    }

    /// The interval before the first in-period event is zero-weighted, so a
    /// late first event only earns from its own timestamp.
    #[test]
    fn test_pre_first_event_gap_is_unweighted() {
        let history = vec![(ts(3000), BigDecimal::from(600))];
        let earned = integrate_balance_history(&history, ts(3600), &rate());
        // 600 × 0.01 × (600s / 3600s per hour) = 1.0
        assert_eq!(earned, BigDecimal::from_str("1.0").unwrap());
    }

    #[test]
    fn test_event_at_period_end_has_no_tail() {
        let history = vec![
            (ts(0), BigDecimal::from(100)),
            (ts(3600), BigDecimal::from(0)),
        ];
        let earned = integrate_balance_history(&history, ts(3600), &rate());
        assert_eq!(earned, BigDecimal::from_str("1.0").unwrap());
    }

    /// Settling adjacent windows equals settling their union when each
    /// window opens on an event.
    #[test]
    fn test_additivity_over_adjacent_windows() {
        let e0 = (ts(0), BigDecimal::from(100));
        let e1 = (ts(3600), BigDecimal::from(60));

        let first = integrate_balance_history(&[e0.clone()], ts(3600), &rate());
        let second = integrate_balance_history(&[e1.clone()], ts(7200), &rate());
        let combined = integrate_balance_history(&[e0, e1], ts(7200), &rate());

        assert_eq!(first + second, combined);
    }

    /// Sub-minute precision survives the minutes/60 formulation.
    #[test]
    fn test_sub_minute_segment() {
        let history = vec![(ts(0), BigDecimal::from(3600))];
        let earned = integrate_balance_history(&history, ts(90), &rate());
        // 3600 × 0.01 × (90s / 3600s) = 0.9
        assert_eq!(earned, BigDecimal::from_str("0.9").unwrap());
    }

    #[test]
    fn test_zero_balance_segment_earns_nothing() {
        let history = vec![
            (ts(0), BigDecimal::from(0)),
            (ts(1800), BigDecimal::from(100)),
        ];
        let earned = integrate_balance_history(&history, ts(3600), &rate());
        assert_eq!(earned, BigDecimal::from_str("0.5").unwrap());
    }

    #[test]
    fn test_scale_rounding_bound() {
        // 1 token for 1 second at rate 0.01: 0.01 / 3600 is non-terminating;
        // storage rounds to 18 fractional digits.
        let history = vec![(ts(0), BigDecimal::from(1))];
        let earned = integrate_balance_history(&history, ts(1), &rate())
            .with_scale_round(POINTS_SCALE, RoundingMode::HalfUp);
        assert_eq!(
            earned,
            BigDecimal::from_str("0.000002777777777778").unwrap()
        );
    }
}
