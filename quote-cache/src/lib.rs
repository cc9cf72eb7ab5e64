// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Sharded in-memory store of the latest quote per contract.
//!
//! Readers (classifier, aggregator) are concurrent; writes arrive only from
//! the ingestion farm. Sharding by symbol hash keeps writer contention off
//! the hot read path. Entries are advisory: a miss downgrades the trade's
//! execution level downstream, it never fails a trade.

use core_types::types::Quote;
use lru::LruCache;
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

const SHARDS: usize = 16;

pub struct QuoteCache {
    shards: Vec<RwLock<LruCache<String, Quote>>>,
}

impl QuoteCache {
    /// `capacity` is the soft cap across all shards; the least recently
    /// updated symbol in a shard is evicted once its slice fills.
    pub fn new(capacity: usize) -> Self {
        let per_shard = (capacity / SHARDS).max(1);
        let per_shard = NonZeroUsize::new(per_shard).expect("non-zero shard capacity");
        let shards = (0..SHARDS)
            .map(|_| RwLock::new(LruCache::new(per_shard)))
            .collect();
        Self { shards }
    }

    pub fn store(&self, symbol: &str, quote: Quote) {
        let mut shard = self.shards[self.shard_idx(symbol)].write();
        // put() refreshes recency, so eviction tracks last update.
        if let Some(existing) = shard.get_mut(symbol) {
            *existing = quote;
        } else {
            shard.put(symbol.to_string(), quote);
        }
    }

    pub fn lookup(&self, symbol: &str) -> Option<Quote> {
        // peek() keeps reads from promoting entries: recency means
        // recently *updated*, not recently read.
        self.shards[self.shard_idx(symbol)].read().peek(symbol).copied()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn shard_idx(&self, symbol: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        (hasher.finish() as usize) % SHARDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(bid: f64, ask: f64, ts: i64) -> Quote {
        Quote {
            bid,
            ask,
            bid_size: 10,
            ask_size: 12,
            quote_ts_ms: ts,
        }
    }

    #[test]
    fn store_overwrites_previous_quote() {
        let cache = QuoteCache::new(64);
        cache.store("O:AMD251219C00155000", quote(5.40, 5.50, 1));
        cache.store("O:AMD251219C00155000", quote(5.45, 5.55, 2));
        let q = cache.lookup("O:AMD251219C00155000").unwrap();
        assert_eq!(q.quote_ts_ms, 2);
        assert!((q.bid - 5.45).abs() < 1e-9);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn missing_symbol_is_a_miss_not_an_error() {
        let cache = QuoteCache::new(64);
        assert!(cache.lookup("O:SPY251115P00580000").is_none());
    }

    #[test]
    fn least_recently_updated_is_evicted_under_pressure() {
        // Capacity below the shard count collapses to one entry per shard,
        // so two symbols in the same shard evict the older update.
        let cache = QuoteCache::new(1);
        let symbols: Vec<String> = (0..256).map(|i| format!("O:T{i:03}251219C00100000")).collect();
        let (first, rest) = symbols.split_first().unwrap();
        let twin = rest
            .iter()
            .find(|s| cache.shard_idx(s) == cache.shard_idx(first))
            .expect("two symbols sharing a shard");

        cache.store(first, quote(1.0, 1.1, 1));
        cache.store(twin, quote(2.0, 2.1, 2));
        assert!(cache.lookup(first).is_none());
        assert!(cache.lookup(twin).is_some());
    }

    #[test]
    fn reads_do_not_refresh_recency() {
        // Per-shard capacity of 2: with three symbols in one shard, the
        // least recently *updated* goes, even if it was just read.
        let cache = QuoteCache::new(32);
        let symbols: Vec<String> = (0..256).map(|i| format!("O:U{i:03}251219C00100000")).collect();
        let shard = cache.shard_idx(&symbols[0]);
        let colliding: Vec<&String> =
            symbols.iter().filter(|s| cache.shard_idx(s) == shard).take(3).collect();
        assert_eq!(colliding.len(), 3, "need three symbols sharing a shard");

        cache.store(colliding[0], quote(1.0, 1.1, 1));
        cache.store(colliding[1], quote(2.0, 2.1, 2));
        assert!(cache.lookup(colliding[0]).is_some());
        cache.store(colliding[2], quote(3.0, 3.1, 3));
        assert!(cache.lookup(colliding[0]).is_none());
        assert!(cache.lookup(colliding[1]).is_some());
    }
}
