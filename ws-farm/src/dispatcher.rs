// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Single consumer of every session reader: dedup, volume accounting,
//! quote-cache writes, and fan-out of trades to the pipeline shards.

use crate::protocol::FeedMessage;
use crate::session::SessionEvent;
use core_types::status::{OverallStatus, ServiceStatusHandle, StatusGauge};
use core_types::types::RawTrade;
use log::{debug, info};
use metrics::Metrics;
use parking_lot::Mutex;
use quote_cache::QuoteCache;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Rolling per-contract size volume, read by the rebalancer.
pub type VolumeTable = Arc<Mutex<HashMap<String, u64>>>;

/// Barrier state published while sessions come up.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthProgress {
    pub authenticated: usize,
    pub exhausted: usize,
}

pub struct Dispatcher {
    quote_cache: Arc<QuoteCache>,
    metrics: Arc<Metrics>,
    status: ServiceStatusHandle,
    shard_txs: Vec<mpsc::Sender<RawTrade>>,
    volume: VolumeTable,
    auth_tx: watch::Sender<AuthProgress>,
    dedup: HashSet<(String, u64)>,
    dedup_max_entries: usize,
    sessions_total: usize,
    connected: HashSet<usize>,
    exhausted: HashSet<usize>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        quote_cache: Arc<QuoteCache>,
        metrics: Arc<Metrics>,
        status: ServiceStatusHandle,
        shard_txs: Vec<mpsc::Sender<RawTrade>>,
        volume: VolumeTable,
        auth_tx: watch::Sender<AuthProgress>,
        dedup_max_entries: usize,
        sessions_total: usize,
    ) -> Self {
        Self {
            quote_cache,
            metrics,
            status,
            shard_txs,
            volume,
            auth_tx,
            dedup: HashSet::new(),
            dedup_max_entries: dedup_max_entries.max(1),
            sessions_total,
            connected: HashSet::new(),
            exhausted: HashSet::new(),
        }
    }

    /// Runs until every session sender is gone; dropping the shard senders
    /// afterwards lets the pipeline drain.
    pub async fn run(mut self, mut events: mpsc::Receiver<(usize, SessionEvent)>) {
        while let Some((session, event)) = events.recv().await {
            match event {
                SessionEvent::Authenticated => {
                    self.connected.insert(session);
                    self.publish_connectivity();
                    if self.connected.len() == self.sessions_total {
                        info!("all {} sessions authenticated", self.sessions_total);
                    }
                }
                SessionEvent::Disconnected => {
                    self.connected.remove(&session);
                    self.metrics.reconnects.inc();
                    self.status
                        .push_warning(format!("session {session} reconnecting"));
                    self.publish_connectivity();
                }
                SessionEvent::ReconnectExhausted => {
                    self.connected.remove(&session);
                    self.exhausted.insert(session);
                    self.status
                        .push_error(format!("session {session} beyond reconnect budget"));
                    self.publish_connectivity();
                }
                SessionEvent::Batch { messages, malformed } => {
                    if malformed > 0 {
                        self.metrics.malformed_dropped.inc_by(malformed as u64);
                    }
                    for message in messages {
                        self.dispatch(message).await;
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, message: FeedMessage) {
        match message {
            FeedMessage::Trade(msg) => {
                let Some(raw) = msg.into_raw() else {
                    self.metrics.malformed_dropped.inc();
                    return;
                };
                if !self.first_sighting(&raw) {
                    self.metrics.dedup_dropped.inc();
                    return;
                }
                self.metrics.trades_ingested.inc();
                *self
                    .volume
                    .lock()
                    .entry(raw.symbol.clone())
                    .or_insert(0) += raw.size as u64;
                let shard = shard_for(&raw.symbol, self.shard_txs.len());
                // Bounded channel: a full pipeline slows the farm here.
                let _ = self.shard_txs[shard].send(raw).await;
            }
            FeedMessage::Quote(msg) => {
                let (symbol, quote) = msg.into_quote();
                self.quote_cache.store(&symbol, quote);
                self.metrics.quotes_ingested.inc();
            }
            FeedMessage::Status(status) => {
                debug!(
                    "feed status: {} {}",
                    status.status.as_deref().unwrap_or("-"),
                    status.message.as_deref().unwrap_or("-")
                );
            }
        }
    }

    /// True the first time a `(symbol, sequence)` pair is seen. The set is
    /// bulk-cleared at capacity; it exists to suppress bursts, not to be a
    /// perfect history.
    fn first_sighting(&mut self, raw: &RawTrade) -> bool {
        if self.dedup.len() >= self.dedup_max_entries {
            self.dedup.clear();
        }
        self.dedup.insert((raw.symbol.clone(), raw.sequence))
    }

    fn publish_connectivity(&self) {
        let progress = AuthProgress {
            authenticated: self.connected.len(),
            exhausted: self.exhausted.len(),
        };
        let _ = self.auth_tx.send(progress);
        self.metrics
            .sessions_connected
            .set(self.connected.len() as i64);
        let overall = if self.exhausted.is_empty() {
            if self.connected.len() == self.sessions_total {
                OverallStatus::Ok
            } else {
                OverallStatus::Warn
            }
        } else {
            OverallStatus::Crit
        };
        self.status.set_overall(overall);
        self.status.set_gauges(vec![StatusGauge {
            label: "sessions connected".to_string(),
            value: self.connected.len() as f64,
            max: Some(self.sessions_total as f64),
            unit: Some("sessions".to_string()),
        }]);
        if overall == OverallStatus::Ok {
            self.status.clear_warnings_matching(|w| w.contains("reconnecting"));
        }
    }
}

pub fn shard_for(symbol: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    symbol.hash(&mut hasher);
    (hasher.finish() as usize) % shards.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{QuoteMsg, TradeMsg};

    fn dispatcher(
        shards: usize,
        dedup_max: usize,
    ) -> (
        Dispatcher,
        Vec<mpsc::Receiver<RawTrade>>,
        Arc<QuoteCache>,
        VolumeTable,
    ) {
        let quote_cache = Arc::new(QuoteCache::new(1024));
        let volume: VolumeTable = Arc::new(Mutex::new(HashMap::new()));
        let (auth_tx, _auth_rx) = watch::channel(AuthProgress::default());
        let mut txs = Vec::new();
        let mut rxs = Vec::new();
        for _ in 0..shards {
            let (tx, rx) = mpsc::channel(64);
            txs.push(tx);
            rxs.push(rx);
        }
        let dispatcher = Dispatcher::new(
            Arc::clone(&quote_cache),
            Arc::new(Metrics::new()),
            ServiceStatusHandle::new("farm"),
            txs,
            Arc::clone(&volume),
            auth_tx,
            dedup_max,
            2,
        );
        (dispatcher, rxs, quote_cache, volume)
    }

    fn trade_msg(sym: &str, seq: u64, size: u32) -> FeedMessage {
        FeedMessage::Trade(TradeMsg {
            sym: sym.to_string(),
            p: 5.5,
            s: size,
            x: 302,
            c: vec![],
            t: 1_700_000_000_000_000_000,
            q: seq,
        })
    }

    #[tokio::test]
    async fn duplicate_sequences_are_dropped() {
        let (mut dispatcher, mut rxs, _cache, volume) = dispatcher(1, 1000);
        dispatcher.dispatch(trade_msg("O:AMD251219C00155000", 7, 40)).await;
        dispatcher.dispatch(trade_msg("O:AMD251219C00155000", 7, 40)).await;
        dispatcher.dispatch(trade_msg("O:AMD251219C00155000", 8, 10)).await;

        assert_eq!(rxs[0].recv().await.unwrap().sequence, 7);
        assert_eq!(rxs[0].recv().await.unwrap().sequence, 8);
        assert!(rxs[0].try_recv().is_err());
        // Volume counts unique prints only.
        assert_eq!(volume.lock()["O:AMD251219C00155000"], 50);
    }

    #[tokio::test]
    async fn dedup_set_bulk_clears_at_capacity() {
        let (mut dispatcher, mut rxs, _cache, _volume) = dispatcher(1, 2);
        for seq in 0..3u64 {
            dispatcher.dispatch(trade_msg("O:AMD251219C00155000", seq, 1)).await;
        }
        // Capacity two: the third insert clears the set first, so a replay
        // of sequence 0 now passes. Burst suppression, not history.
        dispatcher.dispatch(trade_msg("O:AMD251219C00155000", 0, 1)).await;
        let mut seen = Vec::new();
        while let Ok(t) = rxs[0].try_recv() {
            seen.push(t.sequence);
        }
        assert_eq!(seen, vec![0, 1, 2, 0]);
    }

    #[tokio::test]
    async fn quotes_land_in_the_cache_not_the_shards() {
        let (mut dispatcher, mut rxs, cache, _volume) = dispatcher(1, 10);
        dispatcher
            .dispatch(FeedMessage::Quote(QuoteMsg {
                sym: "O:AMD251219C00155000".to_string(),
                bp: 5.4,
                ap: 5.5,
                bs: 3,
                ask_size: 4,
                t: 1_700_000_000_000_000_000,
            }))
            .await;
        assert!(cache.lookup("O:AMD251219C00155000").is_some());
        assert!(rxs[0].try_recv().is_err());
    }

    #[tokio::test]
    async fn same_contract_always_hits_the_same_shard() {
        let (mut dispatcher, mut rxs, _cache, _volume) = dispatcher(4, 1000);
        for seq in 0..8u64 {
            dispatcher.dispatch(trade_msg("O:NVDA251122C00145000", seq, 1)).await;
        }
        let owner = shard_for("O:NVDA251122C00145000", 4);
        let mut count = 0;
        while rxs[owner].try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 8);
        for (i, rx) in rxs.iter_mut().enumerate() {
            if i != owner {
                assert!(rx.try_recv().is_err());
            }
        }
    }
}
