// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Consumer side of the classifier-to-store queue.

use crate::{trade_date, AggregateDelta, StorageError, TradeStore};
use chrono_tz::Tz;
use core_types::retry::RetryPolicy;
use core_types::status::{OverallStatus, ServiceStatusHandle};
use core_types::types::ClassifiedTrade;
use log::{debug, error};
use metrics::Metrics;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Drains classified trades into the store. Transient write failures are
/// retried and surfaced as counters; they never propagate upstream.
pub struct PersistenceSink {
    store: Arc<TradeStore>,
    store_threshold: f64,
    tz: Tz,
    metrics: Arc<Metrics>,
    status: ServiceStatusHandle,
    retry: RetryPolicy,
}

impl PersistenceSink {
    pub fn new(
        store: Arc<TradeStore>,
        store_threshold: f64,
        tz: Tz,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            store_threshold,
            tz,
            metrics,
            status: ServiceStatusHandle::new("sink"),
            retry: RetryPolicy::store(),
        }
    }

    pub fn status_handle(&self) -> ServiceStatusHandle {
        self.status.clone()
    }

    /// Runs until the producer side closes, which is how shutdown drains
    /// in-flight trades before the process exits.
    pub async fn run(self, mut rx: mpsc::Receiver<Arc<ClassifiedTrade>>) {
        self.status.set_overall(OverallStatus::Ok);
        while let Some(trade) = rx.recv().await {
            self.metrics.sink_queue_depth.set(rx.len() as i64);
            if trade.premium < self.store_threshold {
                self.metrics.store_skipped_below_threshold.inc();
                continue;
            }
            self.persist(&trade).await;
        }
        self.metrics.sink_queue_depth.set(0);
        self.status.set_overall(OverallStatus::Warn);
        self.status.push_warning("sink queue closed; drained");
    }

    async fn persist(&self, trade: &ClassifiedTrade) {
        let date = trade_date(trade.trade_ts_ms, &self.tz);
        let inserted = self
            .retry
            .retry_async(|_| self.store.insert_trade(trade, date))
            .await;
        match inserted {
            Ok(true) => {
                self.metrics.store_inserts.inc();
                self.status.clear_errors_matching(|m| m.contains("store write"));
                let delta = AggregateDelta::from_trade(trade);
                if let Err(err) = self
                    .retry
                    .retry_async(|_| self.store.apply_daily_delta(date, &delta))
                    .await
                {
                    self.record_failure("daily aggregate", &err);
                }
            }
            Ok(false) => {
                // Unique index caught a replayed (symbol, sequence).
                debug!(
                    "store already holds {} seq {}",
                    trade.symbol, trade.sequence
                );
            }
            Err(err) => self.record_failure("store write", &err),
        }
    }

    fn record_failure(&self, what: &str, err: &StorageError) {
        self.metrics.store_errors.inc();
        self.status.push_error(format!("{what} failed: {err}"));
        error!("{what} failed after retries: {err}");
    }
}
