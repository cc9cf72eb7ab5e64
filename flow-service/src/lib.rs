// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! The classification pipeline between the ingestion farm and the two
//! consumers. Each shard exclusively owns a sliding window, so trades for
//! one contract are decided and published in arrival order; the sink queue
//! is bounded (back-pressure), the broadcast hub is lossy.

use aggregator::{TradeWindow, WindowConfig};
use broadcast_hub::BroadcastHub;
use classifier::Classifier;
use core_types::contract::parse_contract;
use core_types::types::{now_ms, ClassifiedTrade, RawTrade};
use log::info;
use metrics::Metrics;
use quote_cache::QuoteCache;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct FlowPipeline {
    window_cfg: WindowConfig,
    classifier: Classifier,
    quote_cache: Arc<QuoteCache>,
    hub: Arc<BroadcastHub>,
    sink_tx: mpsc::Sender<Arc<ClassifiedTrade>>,
    metrics: Arc<Metrics>,
}

impl FlowPipeline {
    pub fn new(
        window_cfg: WindowConfig,
        classifier: Classifier,
        quote_cache: Arc<QuoteCache>,
        hub: Arc<BroadcastHub>,
        sink_tx: mpsc::Sender<Arc<ClassifiedTrade>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            window_cfg,
            classifier,
            quote_cache,
            hub,
            sink_tx,
            metrics,
        }
    }

    /// One worker per shard receiver. Workers exit when their feed closes,
    /// and the sink sender drops with the last worker, draining the store
    /// queue behind them.
    pub fn spawn(self, shard_rxs: Vec<mpsc::Receiver<RawTrade>>) -> Vec<JoinHandle<()>> {
        info!("flow pipeline running with {} shards", shard_rxs.len());
        shard_rxs
            .into_iter()
            .enumerate()
            .map(|(shard_id, rx)| {
                let worker = ShardWorker {
                    shard_id,
                    window: TradeWindow::new(self.window_cfg.clone()),
                    classifier: self.classifier.clone(),
                    quote_cache: Arc::clone(&self.quote_cache),
                    hub: Arc::clone(&self.hub),
                    sink_tx: self.sink_tx.clone(),
                    metrics: Arc::clone(&self.metrics),
                };
                tokio::spawn(async move {
                    worker.run(rx).await;
                })
            })
            .collect()
    }
}

struct ShardWorker {
    shard_id: usize,
    window: TradeWindow,
    classifier: Classifier,
    quote_cache: Arc<QuoteCache>,
    hub: Arc<BroadcastHub>,
    sink_tx: mpsc::Sender<Arc<ClassifiedTrade>>,
    metrics: Arc<Metrics>,
}

impl ShardWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<RawTrade>) {
        let shard_label = self.shard_id.to_string();
        while let Some(raw) = rx.recv().await {
            let Ok(contract) = parse_contract(&raw.symbol) else {
                self.metrics.malformed_dropped.inc();
                continue;
            };
            let verdict = self.window.process(&raw, now_ms());
            self.metrics
                .trades_classified
                .with_label_values(&[verdict.trade_type.as_str()])
                .inc();
            self.metrics
                .window_entries
                .with_label_values(&[&shard_label])
                .set(self.window.len() as i64);

            let quote = self.quote_cache.lookup(&raw.symbol);
            let classified = Arc::new(self.classifier.classify(&raw, contract, &verdict, quote));

            let outcome = self.hub.publish(Arc::clone(&classified));
            self.metrics
                .broadcast_delivered
                .inc_by(outcome.delivered as u64);
            self.metrics.broadcast_dropped.inc_by(outcome.dropped as u64);

            // Bounded: a slow store backpressures through here to the farm.
            if self.sink_tx.send(classified).await.is_err() {
                break;
            }
        }
    }
}
