// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Periodic redistribution of quote subscriptions across the session farm.
//!
//! Static-tier contracts are pinned to the leading sessions; everything
//! else competes on observed size volume for the dynamic slots. The
//! planner is pure; the loop only diffs and sends commands.

use crate::dispatcher::VolumeTable;
use crate::protocol::quote_channel;
use crate::session::{SessionCommand, SessionHandle};
use core_types::contract::parse_contract;
use log::{debug, info, warn};
use metrics::Metrics;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RebalanceConfig {
    pub sessions_total: usize,
    pub sessions_static: usize,
    pub quotes_per_session: usize,
    pub static_tier_tickers: Vec<String>,
    pub rebalance_interval_ms: u64,
}

/// Desired quote channels per session. Index = session id.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionPlan {
    pub per_session: Vec<HashSet<String>>,
}

impl SubscriptionPlan {
    pub fn total(&self) -> usize {
        self.per_session.iter().map(HashSet::len).sum()
    }
}

/// Partition observed contracts into static and dynamic tiers and chunk
/// them across the farm. No session ever exceeds its quote budget.
pub fn plan_subscriptions(
    volume: &HashMap<String, u64>,
    cfg: &RebalanceConfig,
) -> SubscriptionPlan {
    let static_tier: HashSet<&str> = cfg
        .static_tier_tickers
        .iter()
        .map(String::as_str)
        .collect();
    let sessions_dynamic = cfg.sessions_total - cfg.sessions_static;

    let mut static_set: Vec<(&String, u64)> = Vec::new();
    let mut dynamic_set: Vec<(&String, u64)> = Vec::new();
    for (symbol, &vol) in volume {
        let is_static = cfg.sessions_static > 0
            && parse_contract(symbol)
                .map(|c| static_tier.contains(c.underlying.as_str()))
                .unwrap_or(false);
        if is_static {
            static_set.push((symbol, vol));
        } else {
            dynamic_set.push((symbol, vol));
        }
    }
    // Volume-descending, symbol as tie break so plans are deterministic.
    static_set.sort_by_key(|&(symbol, vol)| (Reverse(vol), symbol.clone()));
    dynamic_set.sort_by_key(|&(symbol, vol)| (Reverse(vol), symbol.clone()));
    static_set.truncate(cfg.sessions_static * cfg.quotes_per_session);
    dynamic_set.truncate(sessions_dynamic * cfg.quotes_per_session);

    let mut per_session: Vec<HashSet<String>> = vec![HashSet::new(); cfg.sessions_total];
    for (i, (symbol, _)) in static_set.iter().enumerate() {
        per_session[i % cfg.sessions_static.max(1)].insert(quote_channel(symbol));
    }
    for (i, (symbol, _)) in dynamic_set.iter().enumerate() {
        let session = cfg.sessions_static + (i % sessions_dynamic.max(1));
        per_session[session].insert(quote_channel(symbol));
    }
    SubscriptionPlan { per_session }
}

/// Owns the subscription table; the only task that mutates it.
pub struct Rebalancer {
    cfg: RebalanceConfig,
    volume: VolumeTable,
    sessions: Vec<SessionHandle>,
    table: Vec<HashSet<String>>,
    metrics: Arc<Metrics>,
}

impl Rebalancer {
    pub fn new(
        cfg: RebalanceConfig,
        volume: VolumeTable,
        sessions: Vec<SessionHandle>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let table = vec![HashSet::new(); cfg.sessions_total];
        Self {
            cfg,
            volume,
            sessions,
            table,
            metrics,
        }
    }

    /// Tick forever; the first run is offset by one interval so the volume
    /// table has something to say. Each tick runs under a deadline so a
    /// stalled session queue cannot overlap the next tick.
    pub async fn run(mut self, cancel: CancellationToken) {
        let period = Duration::from_millis(self.cfg.rebalance_interval_ms.max(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match tokio::time::timeout(period, self.rebalance_once()).await {
                        Ok(moves) => debug!("rebalance moved {moves} channels"),
                        Err(_) => warn!("rebalance tick exceeded its deadline; will retry"),
                    }
                }
            }
        }
    }

    async fn rebalance_once(&mut self) -> usize {
        let snapshot = self.volume.lock().clone();
        let plan = plan_subscriptions(&snapshot, &self.cfg);
        let mut moves = 0usize;
        for (session, desired) in plan.per_session.into_iter().enumerate() {
            let current = &self.table[session];
            let removals: Vec<String> = current.difference(&desired).cloned().collect();
            let additions: Vec<String> = desired.difference(current).cloned().collect();
            moves += removals.len() + additions.len();
            if !removals.is_empty() {
                let _ = self.sessions[session]
                    .commands
                    .send(SessionCommand::Unsubscribe(removals))
                    .await;
            }
            if !additions.is_empty() {
                let _ = self.sessions[session]
                    .commands
                    .send(SessionCommand::Subscribe(additions))
                    .await;
            }
            self.metrics
                .session_subscriptions
                .with_label_values(&[&session.to_string()])
                .set(desired.len() as i64);
            self.table[session] = desired;
        }
        if moves > 0 {
            info!(
                "rebalanced {} quote channels across {} sessions",
                self.table.iter().map(HashSet::len).sum::<usize>(),
                self.cfg.sessions_total
            );
        }
        moves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::contract::format_contract;
    use core_types::types::{OptionContract, OptionSide};
    use chrono::NaiveDate;

    fn cfg() -> RebalanceConfig {
        RebalanceConfig {
            sessions_total: 10,
            sessions_static: 3,
            quotes_per_session: 1000,
            static_tier_tickers: vec!["SPY".to_string(), "TSLA".to_string()],
            rebalance_interval_ms: 300_000,
        }
    }

    fn symbol(ticker: &str, strike_millis: u64) -> String {
        format_contract(&OptionContract {
            underlying: ticker.to_string(),
            expiry: NaiveDate::from_ymd_opt(2025, 12, 19).unwrap(),
            side: OptionSide::Call,
            strike: strike_millis as f64 / 1000.0,
        })
    }

    /// Skewed volume over many contracts: budget caps hold and the top
    /// dynamic contracts all get a slot.
    #[test]
    fn skewed_volume_fills_the_dynamic_tier_by_rank() {
        let mut cfg = cfg();
        cfg.quotes_per_session = 100;
        let mut volume = HashMap::new();
        // 2000 non-static contracts, volume descending with rank.
        for i in 0..2000u64 {
            volume.insert(symbol("NVDA", 1_000 + i * 500), 5_000u64.saturating_sub(i * 2));
        }
        // A handful of static-tier contracts.
        for i in 0..10u64 {
            volume.insert(symbol("SPY", 500_000 + i * 1000), 10 + i);
        }
        let plan = plan_subscriptions(&volume, &cfg);

        let budget = cfg.sessions_total * cfg.quotes_per_session;
        assert!(plan.total() <= budget);
        for (session, channels) in plan.per_session.iter().enumerate() {
            assert!(
                channels.len() <= cfg.quotes_per_session,
                "session {session} over budget"
            );
        }

        // Dynamic capacity is 7 * 100; the 700 highest-volume NVDA
        // contracts must all be present.
        let subscribed: HashSet<&String> = plan
            .per_session
            .iter()
            .skip(cfg.sessions_static)
            .flatten()
            .collect();
        for i in 0..700u64 {
            let channel = quote_channel(&symbol("NVDA", 1_000 + i * 500));
            assert!(subscribed.contains(&channel), "missing rank {i}");
        }
    }

    #[test]
    fn static_tier_contracts_stay_on_leading_sessions() {
        let mut volume = HashMap::new();
        volume.insert(symbol("SPY", 580_000), 50);
        volume.insert(symbol("TSLA", 250_000), 1);
        volume.insert(symbol("NVDA", 145_000), 9_999);
        let plan = plan_subscriptions(&volume, &cfg());

        let static_sessions: HashSet<String> = plan.per_session[..3]
            .iter()
            .flatten()
            .cloned()
            .collect();
        assert!(static_sessions.contains(&quote_channel(&symbol("SPY", 580_000))));
        assert!(static_sessions.contains(&quote_channel(&symbol("TSLA", 250_000))));
        // High volume does not buy a non-static contract into the static tier.
        assert!(!static_sessions.contains(&quote_channel(&symbol("NVDA", 145_000))));
        let dynamic_sessions: HashSet<String> = plan.per_session[3..]
            .iter()
            .flatten()
            .cloned()
            .collect();
        assert!(dynamic_sessions.contains(&quote_channel(&symbol("NVDA", 145_000))));
    }

    #[test]
    fn unparseable_symbols_compete_as_dynamic() {
        let mut volume = HashMap::new();
        volume.insert("GARBAGE".to_string(), 100);
        let plan = plan_subscriptions(&volume, &cfg());
        let dynamic: Vec<&String> = plan.per_session[3..].iter().flatten().collect();
        assert_eq!(dynamic, vec![&quote_channel("GARBAGE")]);
    }

    #[test]
    fn plans_are_deterministic_under_ties() {
        let mut volume = HashMap::new();
        for i in 0..50u64 {
            volume.insert(symbol("NVDA", 100_000 + i * 1000), 7);
        }
        let a = plan_subscriptions(&volume, &cfg());
        let b = plan_subscriptions(&volume, &cfg());
        assert_eq!(a, b);
    }
}
