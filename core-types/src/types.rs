// Copyright (c) James Kassemi, SC, US. All rights reserved.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// US equity options contract multiplier.
pub const CONTRACT_MULTIPLIER: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionSide {
    Call,
    Put,
}

/// Immutable identity of a listed option contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub side: OptionSide,
    pub strike: f64,
}

impl OptionContract {
    /// Days to expiration relative to `today`. Negative once expired.
    pub fn days_to_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiry - today).num_days()
    }
}

/// Latest known bid/ask for a contract. Overwritten on every quote event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub bid_size: u32,
    pub ask_size: u32,
    pub quote_ts_ms: i64,
}

impl Quote {
    /// A quote is usable for execution-level placement when both sides are
    /// positive and not crossed.
    pub fn is_actionable(&self) -> bool {
        self.bid > 0.0 && self.ask > 0.0 && self.ask >= self.bid
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

/// A single print as received from the upstream feed, timestamps already
/// down-converted to milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTrade {
    pub symbol: String,
    pub price: f64,
    pub size: u32,
    pub exchange: i32,
    pub conditions: Vec<i32>,
    pub trade_ts_ms: i64,
    pub sequence: u64,
}

impl RawTrade {
    /// Notional dollar amount of this print.
    pub fn premium(&self) -> f64 {
        self.price * self.size as f64 * CONTRACT_MULTIPLIER
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeType {
    Sweep,
    Block,
    Flow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionLevel {
    AboveAsk,
    AtAsk,
    Mid,
    AtBid,
    BelowBid,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowDirection {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockReason {
    LargeIsolated,
    OpraBlockCode,
    DarkVenue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UrgencyLevel {
    Low,
    Moderate,
    High,
    Extreme,
}

/// Composite urgency verdict: numeric score plus fixed display lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Urgency {
    pub score: u8,
    pub level: UrgencyLevel,
    pub label: String,
    pub color: String,
}

/// A raw trade after the aggregator and classifier have run. Published once
/// to persistence (above the store threshold) and once to broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedTrade {
    pub symbol: String,
    pub contract: OptionContract,
    pub price: f64,
    pub size: u32,
    pub exchange: i32,
    pub exchange_name: String,
    pub conditions: Vec<i32>,
    pub trade_ts_ms: i64,
    pub sequence: u64,
    pub premium: f64,
    pub trade_type: TradeType,
    pub execution_level: ExecutionLevel,
    pub priority: u8,
    pub highlight: bool,
    pub urgency: Urgency,
    pub flow_direction: FlowDirection,
    pub sweep_id: Option<String>,
    pub sweep_size: u32,
    pub sweep_exchange_count: u32,
    pub sweep_exchanges: Vec<String>,
    pub is_block: bool,
    pub block_reason: Option<BlockReason>,
}

impl OptionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionSide::Call => "CALL",
            OptionSide::Put => "PUT",
        }
    }
}

impl TradeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeType::Sweep => "SWEEP",
            TradeType::Block => "BLOCK",
            TradeType::Flow => "FLOW",
        }
    }
}

impl ExecutionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionLevel::AboveAsk => "ABOVE_ASK",
            ExecutionLevel::AtAsk => "AT_ASK",
            ExecutionLevel::Mid => "MID",
            ExecutionLevel::AtBid => "AT_BID",
            ExecutionLevel::BelowBid => "BELOW_BID",
            ExecutionLevel::Unknown => "UNKNOWN",
        }
    }
}

impl FlowDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowDirection::Bullish => "BULLISH",
            FlowDirection::Bearish => "BEARISH",
            FlowDirection::Neutral => "NEUTRAL",
        }
    }
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::LargeIsolated => "LARGE_ISOLATED",
            BlockReason::OpraBlockCode => "OPRA_BLOCK_CODE",
            BlockReason::DarkVenue => "DARK_VENUE",
        }
    }
}

impl UrgencyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyLevel::Low => "LOW",
            UrgencyLevel::Moderate => "MODERATE",
            UrgencyLevel::High => "HIGH",
            UrgencyLevel::Extreme => "EXTREME",
        }
    }
}

/// Sentinel venue name for exchange ids with no mapping.
pub const UNKNOWN_EXCHANGE: &str = "UNKNOWN";

/// Human-readable venue for an upstream exchange id.
pub fn exchange_name(id: i32) -> &'static str {
    match id {
        1 => "NYSE AMERICAN",
        4 => "FINRA ADF",
        21 => "IEX",
        65 => "MIAX PEARL",
        66 => "MEMX",
        300 => "OPRA",
        301 => "BOX",
        302 => "CBOE",
        303 => "CBOE C2",
        304 => "CBOE EDGX",
        309 => "MIAX",
        312 => "ISE",
        313 => "ISE GEMINI",
        319 => "NYSE ARCA",
        322 => "NASDAQ",
        323 => "NASDAQ PHLX",
        _ => UNKNOWN_EXCHANGE,
    }
}

/// Current wall clock in milliseconds since the epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
