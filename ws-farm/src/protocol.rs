// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Wire format of the upstream options socket. Frames are JSON arrays of
//! messages discriminated by `ev`; timestamps arrive in nanoseconds and are
//! converted to milliseconds here, once, at ingress.

use core_types::types::{Quote, RawTrade};
use serde::{Deserialize, Serialize};

pub const TRADE_FIREHOSE_CHANNEL: &str = "T.*";

/// Quote channel name for one contract.
pub fn quote_channel(symbol: &str) -> String {
    format!("Q.{symbol}")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "ev")]
pub enum FeedMessage {
    #[serde(rename = "T")]
    Trade(TradeMsg),
    #[serde(rename = "Q")]
    Quote(QuoteMsg),
    #[serde(rename = "status")]
    Status(StatusMsg),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeMsg {
    pub sym: String,
    /// Price.
    pub p: f64,
    /// Size in contracts.
    pub s: u32,
    /// Exchange id.
    pub x: i32,
    /// Condition codes.
    #[serde(default)]
    pub c: Vec<i32>,
    /// Source timestamp, nanoseconds.
    pub t: i64,
    /// Per-contract sequence.
    pub q: u64,
}

impl TradeMsg {
    /// Validate and down-convert. None marks the print malformed.
    pub fn into_raw(self) -> Option<RawTrade> {
        if self.p <= 0.0 || self.s == 0 || self.sym.is_empty() {
            return None;
        }
        Some(RawTrade {
            symbol: self.sym,
            price: self.p,
            size: self.s,
            exchange: self.x,
            conditions: self.c,
            trade_ts_ms: self.t / 1_000_000,
            sequence: self.q,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteMsg {
    pub sym: String,
    /// Bid price.
    pub bp: f64,
    /// Ask price.
    pub ap: f64,
    /// Bid size.
    #[serde(default)]
    pub bs: u32,
    /// Ask size.
    #[serde(rename = "as", default)]
    pub ask_size: u32,
    /// Source timestamp, nanoseconds.
    pub t: i64,
}

impl QuoteMsg {
    pub fn into_quote(self) -> (String, Quote) {
        let quote = Quote {
            bid: self.bp,
            ask: self.ap,
            bid_size: self.bs,
            ask_size: self.ask_size,
            quote_ts_ms: self.t / 1_000_000,
        };
        (self.sym, quote)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusMsg {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusMsg {
    pub fn is_auth_success(&self) -> bool {
        self.status.as_deref() == Some("auth_success")
    }

    pub fn is_auth_failure(&self) -> bool {
        self.status.as_deref() == Some("auth_failed")
    }
}

#[derive(Debug, Serialize)]
struct ClientFrame<'a> {
    action: &'a str,
    params: &'a str,
}

fn client_frame(action: &str, params: &str) -> String {
    serde_json::to_string(&ClientFrame { action, params }).unwrap_or_default()
}

pub fn auth_frame(api_key: &str) -> String {
    client_frame("auth", api_key)
}

pub fn subscribe_frame(channels: &[String]) -> String {
    client_frame("subscribe", &channels.join(","))
}

pub fn unsubscribe_frame(channels: &[String]) -> String {
    client_frame("unsubscribe", &channels.join(","))
}

/// Decode one text frame. Unparseable messages inside an otherwise valid
/// array are counted and skipped, never failing the batch.
pub fn decode_frame(text: &str) -> (Vec<FeedMessage>, usize) {
    let values: Vec<serde_json::Value> = match serde_json::from_str(text) {
        Ok(serde_json::Value::Array(values)) => values,
        Ok(single) => vec![single],
        Err(_) => return (Vec::new(), 1),
    };
    let mut messages = Vec::with_capacity(values.len());
    let mut malformed = 0usize;
    for value in values {
        match serde_json::from_value::<FeedMessage>(value) {
            Ok(message) => messages.push(message),
            Err(_) => malformed += 1,
        }
    }
    (messages, malformed)
}
