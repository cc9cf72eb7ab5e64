// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Turns an aggregator verdict plus quote context into the downstream
//! classification: execution level against the NBBO, priority bucket,
//! urgency score, and flow direction.

use aggregator::WindowVerdict;
use core_types::types::{
    exchange_name, ClassifiedTrade, ExecutionLevel, FlowDirection, OptionContract, OptionSide,
    Quote, RawTrade, TradeType, Urgency, UrgencyLevel,
};

/// Condition codes that mark an execution as aggressive.
const AGGRESSIVE_CONDITION_CODES: &[i32] = &[220, 229, 230];

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Price tolerance when placing a print against the NBBO.
    pub level_tolerance: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            level_tolerance: 0.01,
        }
    }
}

/// Stateless; one instance is shared by every pipeline shard.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    cfg: ClassifierConfig,
}

impl Classifier {
    pub fn new(cfg: ClassifierConfig) -> Self {
        Self { cfg }
    }

    /// Produce the full classified trade. Total: every input yields exactly
    /// one trade type and one execution level.
    pub fn classify(
        &self,
        raw: &RawTrade,
        contract: OptionContract,
        verdict: &WindowVerdict,
        quote: Option<Quote>,
    ) -> ClassifiedTrade {
        let premium = raw.premium();
        let execution_level = self.execution_level(raw.price, quote.as_ref());
        let (priority, highlight) = priority(verdict.trade_type, execution_level, premium);
        let aggressive = raw
            .conditions
            .iter()
            .any(|c| AGGRESSIVE_CONDITION_CODES.contains(c));
        let urgency = urgency(
            verdict.trade_type,
            verdict.sweep_exchange_count,
            premium,
            aggressive,
        );
        let flow_direction = flow_direction(contract.side, verdict.trade_type, premium, aggressive);

        ClassifiedTrade {
            symbol: raw.symbol.clone(),
            contract,
            price: raw.price,
            size: raw.size,
            exchange: raw.exchange,
            exchange_name: exchange_name(raw.exchange).to_string(),
            conditions: raw.conditions.clone(),
            trade_ts_ms: raw.trade_ts_ms,
            sequence: raw.sequence,
            premium,
            trade_type: verdict.trade_type,
            execution_level,
            priority,
            highlight,
            urgency,
            flow_direction,
            sweep_id: verdict.sweep_id.clone(),
            sweep_size: verdict.sweep_size,
            sweep_exchange_count: verdict.sweep_exchange_count,
            sweep_exchanges: verdict.sweep_exchanges.clone(),
            is_block: verdict.is_block,
            block_reason: verdict.block_reason,
        }
    }

    /// Place a print against the quote. UNKNOWN exactly when the quote is
    /// absent or not actionable; otherwise tolerance buckets, snapping to
    /// the side of the mid when nothing matches.
    pub fn execution_level(&self, price: f64, quote: Option<&Quote>) -> ExecutionLevel {
        let eps = self.cfg.level_tolerance;
        let Some(quote) = quote.filter(|q| q.is_actionable()) else {
            return ExecutionLevel::Unknown;
        };
        let mid = quote.mid();
        if price > quote.ask + eps {
            ExecutionLevel::AboveAsk
        } else if (price - quote.ask).abs() <= eps {
            ExecutionLevel::AtAsk
        } else if (price - mid).abs() <= eps {
            ExecutionLevel::Mid
        } else if (price - quote.bid).abs() <= eps {
            ExecutionLevel::AtBid
        } else if price < quote.bid - eps {
            ExecutionLevel::BelowBid
        } else if price > mid {
            ExecutionLevel::AtAsk
        } else if price < mid {
            ExecutionLevel::AtBid
        } else {
            ExecutionLevel::Mid
        }
    }
}

/// Priority bucket and highlight flag for a (trade type, level) pair.
pub fn priority(trade_type: TradeType, level: ExecutionLevel, premium: f64) -> (u8, bool) {
    use ExecutionLevel::*;
    use TradeType::*;
    match (trade_type, level) {
        (_, Unknown) => (4, false),
        (Sweep | Block, AboveAsk) => (1, true),
        (Sweep | Block, AtAsk) => (2, premium >= 100_000.0),
        (Sweep | Block, AtBid) => (3, premium >= 250_000.0),
        (Sweep | Block, Mid | BelowBid) => (4, false),
        (Flow, AboveAsk | AtAsk) => (3, premium >= 200_000.0),
        (Flow, AtBid | Mid | BelowBid) => (4, premium >= 300_000.0),
    }
}

/// Urgency score in [0, 100] with its display lookups.
pub fn urgency(
    trade_type: TradeType,
    sweep_exchange_count: u32,
    premium: f64,
    aggressive: bool,
) -> Urgency {
    let mut score = 0u32;
    if trade_type == TradeType::Sweep {
        score += 30;
        score += (sweep_exchange_count.saturating_sub(1) * 5).min(15);
    }
    score += premium_band(premium);
    if aggressive {
        score += 20;
    }
    if trade_type == TradeType::Block {
        score += 10;
    }
    let score = score.min(100) as u8;
    let level = if score >= 80 {
        UrgencyLevel::Extreme
    } else if score >= 60 {
        UrgencyLevel::High
    } else if score >= 40 {
        UrgencyLevel::Moderate
    } else {
        UrgencyLevel::Low
    };
    let (label, color) = match level {
        UrgencyLevel::Extreme => ("EXTREME", "#d32f2f"),
        UrgencyLevel::High => ("HIGH", "#f57c00"),
        UrgencyLevel::Moderate => ("MODERATE", "#fbc02d"),
        UrgencyLevel::Low => ("LOW", "#9e9e9e"),
    };
    Urgency {
        score,
        level,
        label: label.to_string(),
        color: color.to_string(),
    }
}

fn premium_band(premium: f64) -> u32 {
    if premium >= 1_000_000.0 {
        30
    } else if premium >= 500_000.0 {
        25
    } else if premium >= 250_000.0 {
        20
    } else if premium >= 100_000.0 {
        15
    } else if premium >= 50_000.0 {
        10
    } else if premium >= 25_000.0 {
        5
    } else {
        0
    }
}

/// Directional read of the print. Works without a quote: the trade type
/// alone can carry direction.
pub fn flow_direction(
    side: OptionSide,
    trade_type: TradeType,
    premium: f64,
    aggressive: bool,
) -> FlowDirection {
    let directional = trade_type == TradeType::Sweep
        || (trade_type == TradeType::Block && premium >= 200_000.0)
        || (aggressive && premium >= 100_000.0);
    if !directional {
        return FlowDirection::Neutral;
    }
    match side {
        OptionSide::Call => FlowDirection::Bullish,
        OptionSide::Put => FlowDirection::Bearish,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggregator::{TradeWindow, WindowConfig};
    use chrono::NaiveDate;
    use core_types::contract::parse_contract;

    fn quote(bid: f64, ask: f64) -> Quote {
        Quote {
            bid,
            ask,
            bid_size: 10,
            ask_size: 10,
            quote_ts_ms: 0,
        }
    }

    fn raw(symbol: &str, price: f64, size: u32, conditions: &[i32]) -> RawTrade {
        RawTrade {
            symbol: symbol.to_string(),
            price,
            size,
            exchange: 302,
            conditions: conditions.to_vec(),
            trade_ts_ms: 1_700_000_000_000,
            sequence: 1,
        }
    }

    #[test]
    fn execution_levels_follow_the_nbbo() {
        let c = Classifier::default();
        let q = quote(4.30, 4.45);
        assert_eq!(c.execution_level(4.50, Some(&q)), ExecutionLevel::AboveAsk);
        assert_eq!(c.execution_level(4.45, Some(&q)), ExecutionLevel::AtAsk);
        assert_eq!(c.execution_level(4.375, Some(&q)), ExecutionLevel::Mid);
        assert_eq!(c.execution_level(4.30, Some(&q)), ExecutionLevel::AtBid);
        assert_eq!(c.execution_level(4.20, Some(&q)), ExecutionLevel::BelowBid);
    }

    #[test]
    fn gaps_between_buckets_snap_to_the_mid_side() {
        let c = Classifier::default();
        // Wide market: 4.42 is past mid, inside ask, outside every
        // tolerance bucket.
        let q = quote(4.00, 4.60);
        assert_eq!(c.execution_level(4.42, Some(&q)), ExecutionLevel::AtAsk);
        assert_eq!(c.execution_level(4.10, Some(&q)), ExecutionLevel::AtBid);
    }

    #[test]
    fn unknown_iff_quote_absent_or_invalid() {
        let c = Classifier::default();
        assert_eq!(c.execution_level(5.0, None), ExecutionLevel::Unknown);
        let crossed = quote(5.2, 5.1);
        assert_eq!(
            c.execution_level(5.0, Some(&crossed)),
            ExecutionLevel::Unknown
        );
        let empty = quote(0.0, 5.1);
        assert_eq!(c.execution_level(5.0, Some(&empty)), ExecutionLevel::Unknown);
    }

    #[test]
    fn priority_never_improves_as_levels_soften() {
        use ExecutionLevel::*;
        for trade_type in [TradeType::Sweep, TradeType::Block, TradeType::Flow] {
            for premium in [10_000.0, 150_000.0, 400_000.0] {
                let ladder: Vec<u8> = [AboveAsk, AtAsk, AtBid]
                    .into_iter()
                    .map(|level| priority(trade_type, level, premium).0)
                    .collect();
                assert!(
                    ladder.windows(2).all(|w| w[0] <= w[1]),
                    "{trade_type:?} {premium}: {ladder:?}"
                );
            }
        }
    }

    #[test]
    fn highlight_thresholds_per_bucket() {
        assert!(priority(TradeType::Sweep, ExecutionLevel::AboveAsk, 1.0).1);
        assert!(!priority(TradeType::Sweep, ExecutionLevel::AtAsk, 99_000.0).1);
        assert!(priority(TradeType::Sweep, ExecutionLevel::AtAsk, 100_000.0).1);
        assert!(priority(TradeType::Flow, ExecutionLevel::AtAsk, 200_000.0).1);
        assert!(!priority(TradeType::Flow, ExecutionLevel::Mid, 250_000.0).1);
        assert!(priority(TradeType::Flow, ExecutionLevel::Mid, 300_000.0).1);
        assert!(!priority(TradeType::Block, ExecutionLevel::Unknown, 1e9).1);
    }

    #[test]
    fn urgency_scores_accumulate_and_clamp() {
        // Sweep over four venues, $1m premium, aggressive print.
        let u = urgency(TradeType::Sweep, 4, 1_000_000.0, true);
        assert_eq!(u.score, 95);
        assert_eq!(u.level, UrgencyLevel::Extreme);
        assert_eq!(u.label, "EXTREME");

        let u = urgency(TradeType::Block, 0, 120_000.0, false);
        assert_eq!(u.score, 25);
        assert_eq!(u.level, UrgencyLevel::Low);

        let u = urgency(TradeType::Flow, 0, 60_000.0, true);
        assert_eq!(u.score, 30);
        assert_eq!(u.level, UrgencyLevel::Low);

        let u = urgency(TradeType::Sweep, 2, 260_000.0, false);
        assert_eq!(u.score, 55);
        assert_eq!(u.level, UrgencyLevel::Moderate);
    }

    #[test]
    fn direction_comes_from_side_and_trade_type() {
        use FlowDirection::*;
        use OptionSide::*;
        assert_eq!(
            flow_direction(Call, TradeType::Sweep, 1_000.0, false),
            Bullish
        );
        assert_eq!(
            flow_direction(Put, TradeType::Sweep, 1_000.0, false),
            Bearish
        );
        assert_eq!(
            flow_direction(Call, TradeType::Block, 200_000.0, false),
            Bullish
        );
        assert_eq!(
            flow_direction(Call, TradeType::Block, 150_000.0, false),
            Neutral
        );
        assert_eq!(
            flow_direction(Put, TradeType::Flow, 100_000.0, true),
            Bearish
        );
        assert_eq!(
            flow_direction(Call, TradeType::Flow, 90_000.0, true),
            Neutral
        );
        assert_eq!(flow_direction(Call, TradeType::Flow, 1e9, false), Neutral);
    }

    #[test]
    fn at_ask_sweep_scenario() {
        let mut window = TradeWindow::new(WindowConfig::default());
        let classifier = Classifier::default();
        let symbol = "O:AMD251219C00155000";
        let q = quote(5.40, 5.50);
        let t0 = 1_700_000_000_000i64;

        let mut last = None;
        for (i, exchange) in [65, 66, 302].into_iter().enumerate() {
            let mut print = raw(symbol, 5.50, 40, &[]);
            print.exchange = exchange;
            print.sequence = i as u64 + 1;
            let verdict = window.process(&print, t0 + i as i64 * 30);
            let contract = parse_contract(symbol).unwrap();
            last = Some(classifier.classify(&print, contract, &verdict, Some(q)));
        }

        let trade = last.unwrap();
        assert_eq!(trade.trade_type, TradeType::Sweep);
        assert_eq!(trade.execution_level, ExecutionLevel::AtAsk);
        assert_eq!(trade.priority, 2);
        assert_eq!(trade.sweep_exchange_count, 3);
        assert!(trade.sweep_id.is_some());
        assert_eq!(trade.flow_direction, FlowDirection::Bullish);
    }

    #[test]
    fn isolated_block_scenario() {
        let mut window = TradeWindow::new(WindowConfig::default());
        let classifier = Classifier::default();
        let symbol = "O:SPY251115P00580000";
        let print = raw(symbol, 8.25, 800, &[]);
        let verdict = window.process(&print, 1_700_000_000_000);
        let contract = parse_contract(symbol).unwrap();
        let trade = classifier.classify(&print, contract, &verdict, Some(quote(8.10, 8.25)));

        assert_eq!(trade.trade_type, TradeType::Block);
        assert_eq!(
            trade.block_reason,
            Some(core_types::types::BlockReason::LargeIsolated)
        );
        assert_eq!(trade.execution_level, ExecutionLevel::AtAsk);
        assert_eq!(trade.priority, 2);
        assert!(trade.is_block);
        // 800 contracts at 8.25 is a put block over $200k: bearish.
        assert_eq!(trade.flow_direction, FlowDirection::Bearish);
    }

    #[test]
    fn below_bid_flow_scenario() {
        let mut window = TradeWindow::new(WindowConfig::default());
        let classifier = Classifier::default();
        let symbol = "O:AMD251219C00155000";
        let print = raw(symbol, 4.20, 50, &[]);
        let verdict = window.process(&print, 1_700_000_000_000);
        let contract = parse_contract(symbol).unwrap();
        let trade = classifier.classify(&print, contract, &verdict, Some(quote(4.30, 4.45)));

        assert_eq!(trade.trade_type, TradeType::Flow);
        assert_eq!(trade.execution_level, ExecutionLevel::BelowBid);
        assert_eq!(trade.priority, 4);
        assert!(!trade.highlight);
    }

    #[test]
    fn missing_quote_scenario() {
        let mut window = TradeWindow::new(WindowConfig::default());
        let classifier = Classifier::default();
        let symbol = "O:NVDA251122C00145000";
        let print = raw(symbol, 6.40, 10, &[]);
        let verdict = window.process(&print, 1_700_000_000_000);
        let contract = parse_contract(symbol).unwrap();
        let trade = classifier.classify(&print, contract, &verdict, None);

        assert_eq!(trade.trade_type, TradeType::Flow);
        assert_eq!(trade.execution_level, ExecutionLevel::Unknown);
        assert_eq!(trade.priority, 4);
        assert_eq!(trade.flow_direction, FlowDirection::Neutral);
    }

    #[test]
    fn classified_trade_keeps_contract_fields() {
        let mut window = TradeWindow::new(WindowConfig::default());
        let classifier = Classifier::default();
        let symbol = "O:SPY251115P00580000";
        let print = raw(symbol, 1.0, 1, &[]);
        let verdict = window.process(&print, 1_700_000_000_000);
        let contract = parse_contract(symbol).unwrap();
        let trade = classifier.classify(&print, contract, &verdict, None);
        assert_eq!(trade.contract.underlying, "SPY");
        assert_eq!(trade.contract.side, OptionSide::Put);
        assert_eq!(
            trade.contract.expiry,
            NaiveDate::from_ymd_opt(2025, 11, 15).unwrap()
        );
        assert!((trade.premium - 100.0).abs() < 1e-9);
    }
}
