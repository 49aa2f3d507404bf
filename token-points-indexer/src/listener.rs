// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-chain ingestion listener.
//!
//! On every tick the listener advances the checkpoint toward the confirmed
//! head: it fetches `Transfer` logs for the next bounded block window, hands
//! each parsed event (with its block timestamp) to the balance state
//! machine in log order, and only then persists the new checkpoint. A failed
//! pass is retried on a linear schedule and otherwise leaves the checkpoint
//! untouched, so a restart replays the same window and the tx-hash barrier
//! absorbs the duplicates.
//!
//! Exactly one pass is in flight per chain; a tick that lands while the
//! previous pass is still running is dropped with a warning.
//!
//! In adaptive mode a bounded queue sits between parse and apply. The apply
//! side stays single-consumer so per-chain ordering holds, and a sampled
//! fill ratio steers the poll interval between its bounds.

use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::balance::BalanceProcessor;
use crate::chain_client::ChainClient;
use crate::config::ChainConfig;
use crate::error::{PointsError, PointsResult};
use crate::events::{parse_transfer_log, TransferEvent};
use crate::metrics::IndexerMetrics;
use crate::store::ChainStateStore;

/// Upstream RPC providers commonly cap filter ranges.
const MAX_BATCH_SIZE: i64 = 5_000;
const DEFAULT_BATCH_SIZE: i64 = 100;

const MIN_PULL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_PULL_INTERVAL: Duration = Duration::from_secs(60);
const MONITOR_INTERVAL: Duration = Duration::from_secs(10);
const HIGH_WATERMARK: f64 = 0.8;
const LOW_WATERMARK: f64 = 0.3;

const QUEUE_FULL_RETRY: Duration = Duration::from_millis(100);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct ChainListener {
    cfg: ChainConfig,
    client: Arc<ChainClient>,
    processor: Arc<BalanceProcessor>,
    chain_states: ChainStateStore,
    metrics: Arc<IndexerMetrics>,
    queue: Option<EventQueue>,
}

impl ChainListener {
    pub fn new(
        cfg: ChainConfig,
        client: Arc<ChainClient>,
        processor: Arc<BalanceProcessor>,
        chain_states: ChainStateStore,
        metrics: Arc<IndexerMetrics>,
    ) -> Self {
        Self {
            cfg,
            client,
            processor,
            chain_states,
            metrics,
            queue: None,
        }
    }

    /// Run the listener until cancellation. In-flight work is given a grace
    /// period to finish; an aborted pass never advances the checkpoint.
    pub async fn run(mut self, cancel: CancellationToken) {
        let chain = self.cfg.id.clone();
        info!(
            "[{}] Starting listener (start_block={}, confirmations={}, batch_size={}, adaptive={})",
            chain,
            self.cfg.start_block,
            self.cfg.confirmation_blocks,
            self.cfg.batch_size,
            self.cfg.adaptive_mode,
        );

        let mut queue_handle = None;
        if self.cfg.adaptive_mode {
            let (queue, handle) = EventQueue::start(
                chain.clone(),
                self.cfg.queue_size,
                self.processor.clone(),
                self.client.clone(),
                self.metrics.clone(),
                cancel.clone(),
            );
            self.queue = Some(queue);
            queue_handle = Some(handle);
        }

        let pull_interval_ms = Arc::new(AtomicU64::new(self.cfg.pull_interval.max(1) * 1_000));
        self.metrics
            .pull_interval_ms
            .with_label_values(&[&chain])
            .set(pull_interval_ms.load(Ordering::Relaxed) as i64);

        let in_flight = Arc::new(AtomicBool::new(false));
        let this = Arc::new(self);

        let mut monitor = time::interval_at(Instant::now() + MONITOR_INTERVAL, MONITOR_INTERVAL);
        monitor.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            let sleep_for = Duration::from_millis(pull_interval_ms.load(Ordering::Relaxed));
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[{}] Listener cancelled", chain);
                    break;
                }
                _ = time::sleep(sleep_for) => {
                    if in_flight.swap(true, Ordering::SeqCst) {
                        warn!("[{}] Previous pass still running, dropping this tick", chain);
                        continue;
                    }
                    let pass = this.clone();
                    let in_flight = in_flight.clone();
                    tokio::spawn(async move {
                        pass.process_with_retry().await;
                        in_flight.store(false, Ordering::SeqCst);
                    });
                }
                _ = monitor.tick() => {
                    this.monitor_and_adapt(&pull_interval_ms);
                }
            }
        }

        // Allow the in-flight pass to complete or roll back.
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while in_flight.load(Ordering::SeqCst) && Instant::now() < deadline {
            time::sleep(Duration::from_millis(100)).await;
        }
        if in_flight.load(Ordering::SeqCst) {
            warn!("[{}] In-flight pass did not finish within grace period", chain);
        }
        if let Some(handle) = queue_handle {
            let _ = handle.await;
        }
        info!("[{}] Listener stopped", chain);
    }

    /// Sample the buffer fill ratio and steer the poll interval.
    fn monitor_and_adapt(&self, pull_interval_ms: &AtomicU64) {
        let Some(queue) = &self.queue else {
            return;
        };

        let ratio = queue.fill_ratio();
        let current = Duration::from_millis(pull_interval_ms.load(Ordering::Relaxed));
        let next = adjust_interval(current, ratio, MIN_PULL_INTERVAL, MAX_PULL_INTERVAL);
        if next != current {
            if next > current {
                warn!(
                    "[{}] Queue usage {:.2}, raising pull interval {:?} -> {:?}",
                    self.cfg.id, ratio, current, next
                );
            } else {
                info!(
                    "[{}] Queue usage {:.2}, lowering pull interval {:?} -> {:?}",
                    self.cfg.id, ratio, current, next
                );
            }
            pull_interval_ms.store(next.as_millis() as u64, Ordering::Relaxed);
            self.metrics
                .pull_interval_ms
                .with_label_values(&[&self.cfg.id])
                .set(next.as_millis() as i64);
        }
    }

    async fn process_with_retry(&self) {
        let attempts = self.cfg.max_retries.max(1);
        for attempt in 1..=attempts {
            match self.process_batch().await {
                Ok(()) => return,
                Err(e) => {
                    self.metrics
                        .batch_errors
                        .with_label_values(&[&self.cfg.id, e.error_type()])
                        .inc();
                    error!(
                        "[{}] Ingestion pass failed (attempt {}/{}): {}",
                        self.cfg.id, attempt, attempts, e
                    );
                    if attempt < attempts {
                        time::sleep(retry_delay(attempt)).await;
                    }
                }
            }
        }
    }

    /// One ingestion pass: fetch the next confirmed window, apply every
    /// event in log order, then advance the checkpoint to the window end.
    async fn process_batch(&self) -> PointsResult<()> {
        let chain = &self.cfg.id;

        let last = self.chain_states.last_processed_block(chain).await?;
        let last = seed_last_processed(last, self.cfg.start_block);
        let confirmed = self.client.confirmed_block_number().await?;

        let Some((batch_start, batch_end)) = batch_window(last, confirmed, self.cfg.batch_size)
        else {
            debug!(
                "[{}] Confirmed head {} not past checkpoint {}, yielding",
                chain, confirmed, last
            );
            return Ok(());
        };

        let logs = self.client.transfer_logs(batch_start, batch_end).await?;
        debug!(
            "[{}] Fetched {} logs in blocks [{}, {}]",
            chain,
            logs.len(),
            batch_start,
            batch_end
        );

        // Malformed logs are skipped, not fatal: blocking the checkpoint on
        // bad data would halt the chain forever.
        let mut events: Vec<TransferEvent> = Vec::with_capacity(logs.len());
        for log in &logs {
            match parse_transfer_log(log) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!("[{}] Skipping malformed log: {}", chain, e);
                    self.metrics.parse_failures.with_label_values(&[chain]).inc();
                }
            }
        }

        // Events arrive from the filter in (block_number, log_index) order
        // and are applied in that order. Timestamps are cached per block
        // within the batch.
        let mut block_timestamps: HashMap<u64, NaiveDateTime> = HashMap::new();
        for event in &events {
            let timestamp = match block_timestamps.get(&event.block_number) {
                Some(ts) => *ts,
                None => {
                    let ts = self.client.block_timestamp(event.block_number).await?;
                    block_timestamps.insert(event.block_number, ts);
                    ts
                }
            };

            match &self.queue {
                Some(queue) => queue.submit(event.clone(), timestamp).await?,
                None => {
                    self.processor
                        .process_transfer(chain, event, timestamp, &self.client)
                        .await?;
                }
            }
        }

        // In adaptive mode wait for the buffered batch to drain so the
        // checkpoint never runs ahead of applied state.
        if let Some(queue) = &self.queue {
            queue.flush().await?;
        }

        self.chain_states.advance(chain, batch_end as i64).await?;
        self.metrics
            .last_processed_block
            .with_label_values(&[chain])
            .set(batch_end as i64);

        info!(
            "[{}] Processed blocks [{}, {}] ({} events)",
            chain,
            batch_start,
            batch_end,
            events.len()
        );
        Ok(())
    }
}

enum QueueItem {
    Apply {
        event: TransferEvent,
        timestamp: NaiveDateTime,
    },
    Flush(oneshot::Sender<PointsResult<()>>),
}

/// Bounded buffer between fetch and apply with a single drain task.
///
/// Submission never drops silently: a full queue is retried on a short
/// spin-wait. A flush barrier reports whether everything enqueued before it
/// applied cleanly.
struct EventQueue {
    tx: mpsc::Sender<QueueItem>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
}

impl EventQueue {
    fn start(
        chain_id: String,
        capacity: usize,
        processor: Arc<BalanceProcessor>,
        client: Arc<ChainClient>,
        metrics: Arc<IndexerMetrics>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let capacity = capacity.max(1);
        let (tx, mut rx) = mpsc::channel::<QueueItem>(capacity);
        let depth = Arc::new(AtomicUsize::new(0));

        let drain_depth = depth.clone();
        let handle = tokio::spawn(async move {
            let mut batch_error: Option<PointsError> = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("[{}] Apply task cancelled", chain_id);
                        break;
                    }
                    item = rx.recv() => {
                        let Some(item) = item else { break };
                        match item {
                            QueueItem::Apply { event, timestamp } => {
                                let remaining = drain_depth
                                    .fetch_sub(1, Ordering::SeqCst)
                                    .saturating_sub(1);
                                metrics
                                    .queue_depth
                                    .with_label_values(&[&chain_id])
                                    .set(remaining as i64);

                                // After the first failure the rest of the
                                // batch is drained without applying; the
                                // flush barrier reports the error and the
                                // pass refetches the window.
                                if batch_error.is_none() {
                                    if let Err(e) = processor
                                        .process_transfer(&chain_id, &event, timestamp, &client)
                                        .await
                                    {
                                        error!("[{}] Apply failed: {}", chain_id, e);
                                        batch_error = Some(e);
                                    }
                                }
                            }
                            QueueItem::Flush(ack) => {
                                let outcome = match batch_error.take() {
                                    Some(e) => Err(e),
                                    None => Ok(()),
                                };
                                let _ = ack.send(outcome);
                            }
                        }
                    }
                }
            }
        });

        (
            Self {
                tx,
                depth,
                capacity,
            },
            handle,
        )
    }

    async fn submit(&self, event: TransferEvent, timestamp: NaiveDateTime) -> PointsResult<()> {
        let mut item = QueueItem::Apply { event, timestamp };
        loop {
            match self.tx.try_send(item) {
                Ok(()) => {
                    self.depth.fetch_add(1, Ordering::SeqCst);
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Full(back)) => {
                    warn!("Event queue full, waiting...");
                    item = back;
                    time::sleep(QUEUE_FULL_RETRY).await;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return Err(PointsError::BalanceUpdate(
                        "event apply task has stopped".to_string(),
                    ));
                }
            }
        }
    }

    async fn flush(&self) -> PointsResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(QueueItem::Flush(ack_tx))
            .await
            .map_err(|_| PointsError::BalanceUpdate("event apply task has stopped".to_string()))?;
        ack_rx
            .await
            .map_err(|_| PointsError::BalanceUpdate("event apply task has stopped".to_string()))?
    }

    fn fill_ratio(&self) -> f64 {
        self.depth.load(Ordering::SeqCst) as f64 / self.capacity as f64
    }
}

/// Seed the checkpoint from configuration when the chain has never run.
fn seed_last_processed(last_processed: i64, config_start_block: i64) -> i64 {
    if last_processed == 0 && config_start_block > 0 {
        config_start_block - 1
    } else {
        last_processed
    }
}

fn clamp_batch_size(batch_size: i64) -> i64 {
    if batch_size <= 0 {
        DEFAULT_BATCH_SIZE
    } else {
        batch_size.min(MAX_BATCH_SIZE)
    }
}

/// The next block window `[last+1, min(confirmed, last+batch)]`, or `None`
/// when the confirmed head has not moved past the checkpoint.
fn batch_window(last_processed: i64, confirmed_head: u64, batch_size: i64) -> Option<(u64, u64)> {
    if confirmed_head <= last_processed.max(0) as u64 {
        return None;
    }
    let start = (last_processed + 1) as u64;
    let size = clamp_batch_size(batch_size) as u64;
    let end = confirmed_head.min(last_processed as u64 + size);
    Some((start, end))
}

/// Multiplicative interval controller: ×1.2 above the high watermark,
/// ×0.8 below the low one, clamped to `[min, max]`.
fn adjust_interval(current: Duration, fill_ratio: f64, min: Duration, max: Duration) -> Duration {
    if fill_ratio > HIGH_WATERMARK {
        current.mul_f64(1.2).min(max)
    } else if fill_ratio < LOW_WATERMARK {
        current.mul_f64(0.8).max(min)
    } else {
        current
    }
}

/// Linear retry schedule: 1s, 2s, 3s.
fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(attempt as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ------------------------------------------------------------------
    // Batch window selection
    // ------------------------------------------------------------------

    #[test]
    fn test_window_not_past_checkpoint() {
        assert_eq!(batch_window(100, 100, 100), None);
        assert_eq!(batch_window(100, 90, 100), None);
        assert_eq!(batch_window(0, 0, 100), None);
    }

    #[test]
    fn test_window_bounded_by_batch_size() {
        // 1000 confirmed blocks available, batch of 100
        assert_eq!(batch_window(100, 1100, 100), Some((101, 200)));
    }

    #[test]
    fn test_window_bounded_by_confirmed_head() {
        assert_eq!(batch_window(100, 150, 100), Some((101, 150)));
    }

    #[test]
    fn test_window_batch_size_defaulted_and_clamped() {
        // Non-positive size falls back to the default of 100.
        assert_eq!(batch_window(0, 10_000, 0), Some((1, 100)));
        assert_eq!(batch_window(0, 10_000, -5), Some((1, 100)));
        // Oversized batch clamps to the RPC limit of 5000.
        assert_eq!(batch_window(0, 100_000, 50_000), Some((1, 5_000)));
    }

    // ------------------------------------------------------------------
    // Checkpoint seeding on (re)start
    // ------------------------------------------------------------------

    #[test]
    fn test_restart_resumes_after_checkpoint() {
        // Checkpoint at 100 with start_block=1: resume at 101, not 1.
        let last = seed_last_processed(100, 1);
        assert_eq!(batch_window(last, 1_000, 100), Some((101, 200)));
    }

    #[test]
    fn test_fresh_start_uses_config_start_block() {
        // No checkpoint with start_block=1000: first batch starts at 1000.
        let last = seed_last_processed(0, 1_000);
        assert_eq!(last, 999);
        assert_eq!(batch_window(last, 2_000, 100), Some((1_000, 1_099)));
    }

    #[test]
    fn test_fresh_start_without_config_starts_at_one() {
        let last = seed_last_processed(0, 0);
        assert_eq!(batch_window(last, 50, 100), Some((1, 50)));
    }

    // ------------------------------------------------------------------
    // Adaptive interval controller
    // ------------------------------------------------------------------

    #[test]
    fn test_adapt_raises_above_high_watermark() {
        let next = adjust_interval(
            Duration::from_secs(10),
            0.9,
            MIN_PULL_INTERVAL,
            MAX_PULL_INTERVAL,
        );
        assert_eq!(next, Duration::from_secs(12));
    }

    #[test]
    fn test_adapt_lowers_below_low_watermark() {
        let next = adjust_interval(
            Duration::from_secs(10),
            0.1,
            MIN_PULL_INTERVAL,
            MAX_PULL_INTERVAL,
        );
        assert_eq!(next, Duration::from_secs(8));
    }

    #[test]
    fn test_adapt_holds_between_watermarks() {
        let current = Duration::from_secs(10);
        assert_eq!(
            adjust_interval(current, 0.5, MIN_PULL_INTERVAL, MAX_PULL_INTERVAL),
            current
        );
    }

    #[test]
    fn test_adapt_clamps_to_bounds() {
        assert_eq!(
            adjust_interval(Duration::from_secs(55), 0.95, MIN_PULL_INTERVAL, MAX_PULL_INTERVAL),
            MAX_PULL_INTERVAL
        );
        assert_eq!(
            adjust_interval(Duration::from_secs(6), 0.0, MIN_PULL_INTERVAL, MAX_PULL_INTERVAL),
            MIN_PULL_INTERVAL
        );
    }

    // ------------------------------------------------------------------
    // Retry schedule
    // ------------------------------------------------------------------

    #[test]
    fn test_retry_delays_are_linear() {
        assert_eq!(retry_delay(1), Duration::from_secs(1));
        assert_eq!(retry_delay(2), Duration::from_secs(2));
        assert_eq!(retry_delay(3), Duration::from_secs(3));
    }
}
