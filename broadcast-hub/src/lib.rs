// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Lossy fan-out of classified trades to live subscribers.
//!
//! Every subscriber owns a bounded outbox. Publishing offers without
//! blocking: a full outbox drops that event for that subscriber only, so a
//! slow consumer can never back up ingestion. The hub tracks nothing about
//! subscribers beyond the connection id.

use core_types::types::ClassifiedTrade;
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub type SubscriberId = u64;

/// What one publish call did across the subscriber set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct BroadcastHub {
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<Arc<ClassifiedTrade>>>>,
    next_id: AtomicU64,
    outbox_capacity: usize,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl BroadcastHub {
    pub fn new(outbox_capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            outbox_capacity: outbox_capacity.max(1),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a subscriber; the receiver is its private outbox.
    pub fn subscribe(&self) -> (SubscriberId, mpsc::Receiver<Arc<ClassifiedTrade>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.outbox_capacity);
        self.subscribers.write().insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.write().remove(&id);
    }

    /// Offer the event to every live subscriber. At-most-once per
    /// subscriber, never blocking.
    pub fn publish(&self, trade: Arc<ClassifiedTrade>) -> PublishOutcome {
        let mut closed: Vec<SubscriberId> = Vec::new();
        let mut outcome = PublishOutcome::default();
        {
            let subscribers = self.subscribers.read();
            for (&id, tx) in subscribers.iter() {
                match tx.try_send(Arc::clone(&trade)) {
                    Ok(()) => outcome.delivered += 1,
                    Err(TrySendError::Full(_)) => outcome.dropped += 1,
                    Err(TrySendError::Closed(_)) => closed.push(id),
                }
            }
        }
        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in closed {
                subscribers.remove(&id);
                debug!("pruned closed broadcast subscriber {id}");
            }
        }
        self.delivered
            .fetch_add(outcome.delivered as u64, Ordering::Relaxed);
        self.dropped
            .fetch_add(outcome.dropped as u64, Ordering::Relaxed);
        outcome
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn delivered_events(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::types::{
        ExecutionLevel, FlowDirection, OptionContract, OptionSide, TradeType, Urgency,
        UrgencyLevel,
    };

    fn classified(seq: u64) -> Arc<ClassifiedTrade> {
        Arc::new(ClassifiedTrade {
            symbol: "O:AMD251219C00155000".to_string(),
            contract: OptionContract {
                underlying: "AMD".to_string(),
                expiry: chrono::NaiveDate::from_ymd_opt(2025, 12, 19).unwrap(),
                side: OptionSide::Call,
                strike: 155.0,
            },
            price: 5.5,
            size: 40,
            exchange: 302,
            exchange_name: "CBOE".to_string(),
            conditions: vec![],
            trade_ts_ms: 0,
            sequence: seq,
            premium: 22_000.0,
            trade_type: TradeType::Flow,
            execution_level: ExecutionLevel::AtAsk,
            priority: 3,
            highlight: false,
            urgency: Urgency {
                score: 10,
                level: UrgencyLevel::Low,
                label: "LOW".to_string(),
                color: "#9e9e9e".to_string(),
            },
            flow_direction: FlowDirection::Neutral,
            sweep_id: None,
            sweep_size: 0,
            sweep_exchange_count: 0,
            sweep_exchanges: vec![],
            is_block: false,
            block_reason: None,
        })
    }

    #[tokio::test]
    async fn every_live_subscriber_gets_the_event() {
        let hub = BroadcastHub::new(8);
        let (_a, mut rx_a) = hub.subscribe();
        let (_b, mut rx_b) = hub.subscribe();
        assert_eq!(hub.publish(classified(1)).delivered, 2);
        assert_eq!(rx_a.recv().await.unwrap().sequence, 1);
        assert_eq!(rx_b.recv().await.unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn full_outbox_drops_for_that_subscriber_only() {
        let hub = BroadcastHub::new(1);
        let (_slow, mut rx_slow) = hub.subscribe();
        let (_fast, mut rx_fast) = hub.subscribe();

        hub.publish(classified(1));
        // Slow subscriber never drains; its outbox of one is now full.
        let outcome = hub.publish(classified(2));
        assert_eq!(outcome, PublishOutcome { delivered: 1, dropped: 1 });
        assert_eq!(hub.dropped_events(), 1);

        assert_eq!(rx_fast.recv().await.unwrap().sequence, 1);
        assert_eq!(rx_fast.recv().await.unwrap().sequence, 2);
        assert_eq!(rx_slow.recv().await.unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned_on_publish() {
        let hub = BroadcastHub::new(4);
        let (_kept, _rx) = hub.subscribe();
        let (gone, rx_gone) = hub.subscribe();
        drop(rx_gone);
        assert_eq!(hub.subscriber_count(), 2);
        hub.publish(classified(1));
        assert_eq!(hub.subscriber_count(), 1);
        // Idempotent unsubscribe after prune.
        hub.unsubscribe(gone);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let hub = BroadcastHub::new(4);
        let (id, mut rx) = hub.subscribe();
        hub.unsubscribe(id);
        assert_eq!(hub.publish(classified(1)).delivered, 0);
        assert!(rx.recv().await.is_none());
    }
}
