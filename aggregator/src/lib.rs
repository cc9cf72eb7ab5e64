// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Sliding-window clustering of option prints into sweeps, blocks, and flow.
//!
//! The window is a bounded ring of recent prints with a per-contract index,
//! so deciding a trade touches only same-contract neighbors. Each call to
//! [`TradeWindow::process`] yields exactly one verdict; the window never
//! fails a trade.

use core_types::ids::sweep_id;
use core_types::types::{exchange_name, RawTrade, TradeType};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

pub use core_types::types::BlockReason;

/// Condition codes the trade-type mapping registers as sweeps. A print
/// carrying one is admitted as a sweep even in isolation; this also wins
/// over the block condition list (233 appears in both).
const SWEEP_CONDITION_CODES: &[i32] = &[233];

/// Aggressive executions push the contract bar up above this mean price.
const SWEEP_FULL_SIZE_PRICE: f64 = 5.0;

/// Single-exchange bursts of at least this many prints still qualify.
const SWEEP_MIN_SINGLE_EXCHANGE_CLUSTER: usize = 3;

#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub buffer_max_size: usize,
    pub buffer_max_age_ms: i64,
    pub sweep_window_ms: i64,
    pub sweep_price_delta: f64,
    pub sweep_min_total: u32,
    pub sweep_min_exchanges: usize,
    pub block_min_size: u32,
    pub block_isolation_ms: i64,
    pub block_conditions: Vec<i32>,
    pub dark_venues: Vec<i32>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            buffer_max_size: 10_000,
            buffer_max_age_ms: 5_000,
            sweep_window_ms: 750,
            sweep_price_delta: 0.10,
            sweep_min_total: 100,
            sweep_min_exchanges: 2,
            block_min_size: 500,
            block_isolation_ms: 100,
            block_conditions: vec![229, 230, 233, 234, 235, 236],
            dark_venues: vec![4, 21, 66],
        }
    }
}

/// Aggregation outcome for a single print.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowVerdict {
    pub trade_type: TradeType,
    pub sweep_id: Option<String>,
    pub sweep_size: u32,
    pub sweep_exchange_count: u32,
    pub sweep_exchanges: Vec<String>,
    pub is_block: bool,
    pub block_reason: Option<BlockReason>,
}

impl WindowVerdict {
    fn flow() -> Self {
        Self {
            trade_type: TradeType::Flow,
            sweep_id: None,
            sweep_size: 0,
            sweep_exchange_count: 0,
            sweep_exchanges: Vec::new(),
            is_block: false,
            block_reason: None,
        }
    }
}

struct WindowEntry {
    id: u64,
    symbol: Arc<str>,
    processed_at: i64,
    price: f64,
    size: u32,
    exchange: i32,
    premium: f64,
    classification: TradeType,
}

/// Bounded ring of recent prints, indexed by contract symbol. Exclusively
/// owned by one pipeline shard; no interior locking.
pub struct TradeWindow {
    buffer_max_size: usize,
    buffer_max_age_ms: i64,
    sweep_window_ms: i64,
    sweep_price_delta: f64,
    sweep_min_total: u32,
    sweep_min_exchanges: usize,
    block_min_size: u32,
    block_isolation_ms: i64,
    block_conditions: HashSet<i32>,
    dark_venues: HashSet<i32>,
    entries: VecDeque<WindowEntry>,
    index: HashMap<Arc<str>, VecDeque<u64>>,
    next_id: u64,
    last_stamp_ms: i64,
}

impl TradeWindow {
    pub fn new(cfg: WindowConfig) -> Self {
        Self {
            buffer_max_size: cfg.buffer_max_size.max(1),
            buffer_max_age_ms: cfg.buffer_max_age_ms,
            sweep_window_ms: cfg.sweep_window_ms,
            sweep_price_delta: cfg.sweep_price_delta,
            sweep_min_total: cfg.sweep_min_total,
            sweep_min_exchanges: cfg.sweep_min_exchanges,
            block_min_size: cfg.block_min_size,
            block_isolation_ms: cfg.block_isolation_ms,
            block_conditions: cfg.block_conditions.into_iter().collect(),
            dark_venues: cfg.dark_venues.into_iter().collect(),
            entries: VecDeque::new(),
            index: HashMap::new(),
            next_id: 0,
            last_stamp_ms: i64::MIN,
        }
    }

    /// Number of prints currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest processing stamp still in the window, for tests and gauges.
    pub fn oldest_processed_at(&self) -> Option<i64> {
        self.entries.front().map(|e| e.processed_at)
    }

    /// Notional premium currently resident in the ring.
    pub fn resident_premium(&self) -> f64 {
        self.entries.iter().map(|e| e.premium).sum()
    }

    /// Prints in the ring carrying the given verdict.
    pub fn classified_in_window(&self, trade_type: TradeType) -> usize {
        self.entries
            .iter()
            .filter(|e| e.classification == trade_type)
            .count()
    }

    /// Decide sweep/block/flow for one print. `now_ms` is the processing
    /// stamp; it is clamped monotonic so reordered wall clocks cannot make
    /// the ring non-causal.
    pub fn process(&mut self, trade: &RawTrade, now_ms: i64) -> WindowVerdict {
        let stamp = now_ms.max(self.last_stamp_ms);
        self.last_stamp_ms = stamp;

        let id = self.insert(trade, stamp);
        self.evict(stamp);

        // Eviction can drop the entry we just inserted when the ring is
        // saturated with newer stamps; the verdict still stands on the
        // cluster visible now.
        let cluster = self.cluster(&trade.symbol, stamp, self.sweep_window_ms);

        let verdict = if let Some(sweep) = self.admit_sweep(trade, stamp, &cluster) {
            sweep
        } else if let Some(reason) = self.admit_block(trade, stamp) {
            WindowVerdict {
                trade_type: TradeType::Block,
                sweep_id: None,
                sweep_size: 0,
                sweep_exchange_count: 0,
                sweep_exchanges: Vec::new(),
                is_block: true,
                block_reason: Some(reason),
            }
        } else {
            WindowVerdict::flow()
        };

        self.record_classification(id, verdict.trade_type);
        verdict
    }

    fn insert(&mut self, trade: &RawTrade, stamp: i64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let symbol: Arc<str> = match self.index.get_key_value(trade.symbol.as_str()) {
            Some((key, _)) => Arc::clone(key),
            None => Arc::from(trade.symbol.as_str()),
        };
        self.entries.push_back(WindowEntry {
            id,
            symbol: Arc::clone(&symbol),
            processed_at: stamp,
            price: trade.price,
            size: trade.size,
            exchange: trade.exchange,
            premium: trade.premium(),
            classification: TradeType::Flow,
        });
        self.index.entry(symbol).or_default().push_back(id);
        id
    }

    fn evict(&mut self, stamp: i64) {
        let cutoff = stamp - self.buffer_max_age_ms;
        loop {
            let drop_front = match self.entries.front() {
                Some(front) => {
                    front.processed_at < cutoff || self.entries.len() > self.buffer_max_size
                }
                None => false,
            };
            if !drop_front {
                break;
            }
            let Some(gone) = self.entries.pop_front() else {
                break;
            };
            if let Some(ids) = self.index.get_mut(&gone.symbol) {
                while ids.front().is_some_and(|&id| id <= gone.id) {
                    ids.pop_front();
                }
                if ids.is_empty() {
                    self.index.remove(&gone.symbol);
                }
            }
        }
    }

    /// Same-contract prints within `horizon_ms` of `stamp`, oldest first,
    /// including the current print.
    fn cluster(&self, symbol: &str, stamp: i64, horizon_ms: i64) -> Vec<&WindowEntry> {
        let Some(ids) = self.index.get(symbol) else {
            return Vec::new();
        };
        let cutoff = stamp - horizon_ms;
        let mut members: Vec<&WindowEntry> = ids
            .iter()
            .rev()
            .map_while(|&id| {
                let entry = self.entry(id)?;
                (entry.processed_at >= cutoff).then_some(entry)
            })
            .collect();
        members.reverse();
        members
    }

    fn entry(&self, id: u64) -> Option<&WindowEntry> {
        let front_id = self.entries.front()?.id;
        let offset = id.checked_sub(front_id)? as usize;
        self.entries.get(offset)
    }

    fn record_classification(&mut self, id: u64, classification: TradeType) {
        let Some(front_id) = self.entries.front().map(|e| e.id) else {
            return;
        };
        if let Some(offset) = id.checked_sub(front_id) {
            if let Some(entry) = self.entries.get_mut(offset as usize) {
                entry.classification = classification;
            }
        }
    }

    fn admit_sweep(
        &self,
        trade: &RawTrade,
        stamp: i64,
        cluster: &[&WindowEntry],
    ) -> Option<WindowVerdict> {
        let by_condition = trade
            .conditions
            .iter()
            .any(|c| SWEEP_CONDITION_CODES.contains(c));

        let admitted = by_condition || self.cluster_is_sweep(cluster);
        if !admitted {
            return None;
        }

        let (total_size, exchanges) = if cluster.is_empty() {
            // Current print was evicted straight out of a saturated ring.
            (trade.size, vec![trade.exchange])
        } else {
            let mut seen = Vec::new();
            let mut total = 0u32;
            for entry in cluster {
                total = total.saturating_add(entry.size);
                if !seen.contains(&entry.exchange) {
                    seen.push(entry.exchange);
                }
            }
            (total, seen)
        };

        Some(WindowVerdict {
            trade_type: TradeType::Sweep,
            sweep_id: Some(sweep_id(&trade.symbol, stamp)),
            sweep_size: total_size,
            sweep_exchange_count: exchanges.len() as u32,
            sweep_exchanges: exchanges
                .iter()
                .map(|&x| exchange_name(x).to_string())
                .collect(),
            is_block: false,
            block_reason: None,
        })
    }

    fn cluster_is_sweep(&self, cluster: &[&WindowEntry]) -> bool {
        if cluster.is_empty() {
            return false;
        }
        let mut min_price = f64::MAX;
        let mut max_price = f64::MIN;
        let mut price_sum = 0.0;
        let mut total_size = 0u32;
        let mut exchanges: HashSet<i32> = HashSet::new();
        for entry in cluster {
            min_price = min_price.min(entry.price);
            max_price = max_price.max(entry.price);
            price_sum += entry.price;
            total_size = total_size.saturating_add(entry.size);
            exchanges.insert(entry.exchange);
        }
        if max_price - min_price > self.sweep_price_delta {
            return false;
        }
        let mean_price = price_sum / cluster.len() as f64;
        let min_contracts = if mean_price > SWEEP_FULL_SIZE_PRICE {
            self.sweep_min_total
        } else {
            self.sweep_min_total / 2
        };
        if total_size < min_contracts {
            return false;
        }
        exchanges.len() >= self.sweep_min_exchanges
            || (exchanges.len() == 1 && cluster.len() >= SWEEP_MIN_SINGLE_EXCHANGE_CLUSTER)
    }

    fn admit_block(&self, trade: &RawTrade, stamp: i64) -> Option<BlockReason> {
        let large = trade.size >= self.block_min_size;
        if large {
            let neighbors = self
                .cluster(&trade.symbol, stamp, self.block_isolation_ms)
                .len();
            // The print itself is in the window; anything else is company.
            if neighbors <= 1 {
                return Some(BlockReason::LargeIsolated);
            }
        }
        if trade
            .conditions
            .iter()
            .any(|c| self.block_conditions.contains(c))
        {
            return Some(BlockReason::OpraBlockCode);
        }
        if large && self.dark_venues.contains(&trade.exchange) {
            return Some(BlockReason::DarkVenue);
        }
        None
    }
}
