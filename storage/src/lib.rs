// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Postgres-backed persistence for classified trades and their daily
//! aggregates. Writes are idempotent on `(contract_symbol, sequence)`;
//! aggregate ratios are derived on read, never stored.

pub mod purge;
pub mod sink;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use core_types::types::{ClassifiedTrade, OptionSide, TradeType};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, Statement};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("unknown rollover timezone: {0}")]
    Timezone(String),
}

/// Reference DDL for the two tables this crate writes. Schema bootstrap is
/// owned by operations tooling; this is what that tooling must produce.
pub const TRADES_DDL: &str = "
CREATE TABLE IF NOT EXISTS trades (
    id BIGSERIAL PRIMARY KEY,
    contract_symbol TEXT NOT NULL,
    sequence BIGINT NOT NULL,
    underlying TEXT NOT NULL,
    expiry DATE NOT NULL,
    side TEXT NOT NULL,
    strike NUMERIC(14, 4) NOT NULL,
    price NUMERIC(14, 4) NOT NULL,
    size INTEGER NOT NULL,
    exchange INTEGER NOT NULL,
    exchange_name TEXT NOT NULL,
    conditions INTEGER[] NOT NULL,
    premium NUMERIC(18, 2) NOT NULL,
    trade_type TEXT NOT NULL,
    execution_level TEXT NOT NULL,
    priority SMALLINT NOT NULL,
    highlight BOOLEAN NOT NULL,
    urgency_score SMALLINT NOT NULL,
    urgency_level TEXT NOT NULL,
    flow_direction TEXT NOT NULL,
    sweep_id TEXT,
    sweep_size INTEGER NOT NULL,
    sweep_exchange_count INTEGER NOT NULL,
    sweep_exchanges TEXT[] NOT NULL,
    is_block BOOLEAN NOT NULL,
    block_reason TEXT,
    executed_at TIMESTAMPTZ NOT NULL,
    trade_date DATE NOT NULL,
    CONSTRAINT trades_symbol_sequence UNIQUE (contract_symbol, sequence)
)";

pub const DAILY_AGGREGATES_DDL: &str = "
CREATE TABLE IF NOT EXISTS daily_aggregates (
    date DATE PRIMARY KEY,
    total_trades BIGINT NOT NULL DEFAULT 0,
    total_premium NUMERIC(20, 2) NOT NULL DEFAULT 0,
    call_count BIGINT NOT NULL DEFAULT 0,
    call_premium NUMERIC(20, 2) NOT NULL DEFAULT 0,
    put_count BIGINT NOT NULL DEFAULT 0,
    put_premium NUMERIC(20, 2) NOT NULL DEFAULT 0,
    sweep_count BIGINT NOT NULL DEFAULT 0,
    sweep_premium NUMERIC(20, 2) NOT NULL DEFAULT 0,
    block_count BIGINT NOT NULL DEFAULT 0,
    block_premium NUMERIC(20, 2) NOT NULL DEFAULT 0,
    flow_count BIGINT NOT NULL DEFAULT 0,
    flow_premium NUMERIC(20, 2) NOT NULL DEFAULT 0,
    p1_count BIGINT NOT NULL DEFAULT 0,
    p1_premium NUMERIC(20, 2) NOT NULL DEFAULT 0,
    p2_count BIGINT NOT NULL DEFAULT 0,
    p2_premium NUMERIC(20, 2) NOT NULL DEFAULT 0,
    p3_count BIGINT NOT NULL DEFAULT 0,
    p3_premium NUMERIC(20, 2) NOT NULL DEFAULT 0,
    p4_count BIGINT NOT NULL DEFAULT 0,
    p4_premium NUMERIC(20, 2) NOT NULL DEFAULT 0
)";

const INSERT_TRADE_SQL: &str = "
INSERT INTO trades (
    contract_symbol, sequence, underlying, expiry, side, strike,
    price, size, exchange, exchange_name, conditions, premium,
    trade_type, execution_level, priority, highlight,
    urgency_score, urgency_level, flow_direction,
    sweep_id, sweep_size, sweep_exchange_count, sweep_exchanges,
    is_block, block_reason, executed_at, trade_date
) VALUES (
    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
    $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27
)
ON CONFLICT ON CONSTRAINT trades_symbol_sequence DO NOTHING";

const APPLY_DAILY_SQL: &str = "
INSERT INTO daily_aggregates (
    date, total_trades, total_premium,
    call_count, call_premium, put_count, put_premium,
    sweep_count, sweep_premium, block_count, block_premium,
    flow_count, flow_premium,
    p1_count, p1_premium, p2_count, p2_premium,
    p3_count, p3_premium, p4_count, p4_premium
) VALUES (
    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
    $15, $16, $17, $18, $19, $20, $21
)
ON CONFLICT (date) DO UPDATE SET
    total_trades = daily_aggregates.total_trades + EXCLUDED.total_trades,
    total_premium = daily_aggregates.total_premium + EXCLUDED.total_premium,
    call_count = daily_aggregates.call_count + EXCLUDED.call_count,
    call_premium = daily_aggregates.call_premium + EXCLUDED.call_premium,
    put_count = daily_aggregates.put_count + EXCLUDED.put_count,
    put_premium = daily_aggregates.put_premium + EXCLUDED.put_premium,
    sweep_count = daily_aggregates.sweep_count + EXCLUDED.sweep_count,
    sweep_premium = daily_aggregates.sweep_premium + EXCLUDED.sweep_premium,
    block_count = daily_aggregates.block_count + EXCLUDED.block_count,
    block_premium = daily_aggregates.block_premium + EXCLUDED.block_premium,
    flow_count = daily_aggregates.flow_count + EXCLUDED.flow_count,
    flow_premium = daily_aggregates.flow_premium + EXCLUDED.flow_premium,
    p1_count = daily_aggregates.p1_count + EXCLUDED.p1_count,
    p1_premium = daily_aggregates.p1_premium + EXCLUDED.p1_premium,
    p2_count = daily_aggregates.p2_count + EXCLUDED.p2_count,
    p2_premium = daily_aggregates.p2_premium + EXCLUDED.p2_premium,
    p3_count = daily_aggregates.p3_count + EXCLUDED.p3_count,
    p3_premium = daily_aggregates.p3_premium + EXCLUDED.p3_premium,
    p4_count = daily_aggregates.p4_count + EXCLUDED.p4_count,
    p4_premium = daily_aggregates.p4_premium + EXCLUDED.p4_premium";

const SELECT_DAILY_SQL: &str = "
SELECT total_trades, total_premium,
       call_count, call_premium, put_count, put_premium,
       sweep_count, sweep_premium, block_count, block_premium,
       flow_count, flow_premium,
       p1_count, p1_premium, p2_count, p2_premium,
       p3_count, p3_premium, p4_count, p4_premium
FROM daily_aggregates WHERE date = $1";

/// Connection to the options store plus prepared hot-path statements.
pub struct TradeStore {
    client: Client,
    insert_trade: Statement,
    apply_daily: Statement,
}

impl TradeStore {
    /// Connect and spawn the connection driver task. Fails fast when the
    /// store is unreachable, which the supervisor treats as fatal at boot.
    pub async fn connect(url: &str) -> Result<(Self, JoinHandle<()>), StorageError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        let driver = tokio::spawn(async move {
            if let Err(err) = connection.await {
                log::error!("store connection terminated: {err}");
            }
        });
        let insert_trade = client.prepare(INSERT_TRADE_SQL).await?;
        let apply_daily = client.prepare(APPLY_DAILY_SQL).await?;
        Ok((
            Self {
                client,
                insert_trade,
                apply_daily,
            },
            driver,
        ))
    }

    pub async fn ping(&self) -> Result<(), StorageError> {
        self.client.simple_query("SELECT 1").await?;
        Ok(())
    }

    /// Create the tables if operations tooling has not run yet. Not called
    /// on the boot path.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        self.client.batch_execute(TRADES_DDL).await?;
        self.client.batch_execute(DAILY_AGGREGATES_DDL).await?;
        Ok(())
    }

    /// Idempotent insert. Returns false when `(contract_symbol, sequence)`
    /// was already stored.
    pub async fn insert_trade(
        &self,
        trade: &ClassifiedTrade,
        trade_date: NaiveDate,
    ) -> Result<bool, StorageError> {
        let executed_at = DateTime::<Utc>::from_timestamp_millis(trade.trade_ts_ms)
            .unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH);
        let rows = self
            .client
            .execute(
                &self.insert_trade,
                &[
                    &trade.symbol,
                    &(trade.sequence as i64),
                    &trade.contract.underlying,
                    &trade.contract.expiry,
                    &trade.contract.side.as_str(),
                    &money(trade.contract.strike, 4),
                    &money(trade.price, 4),
                    &(trade.size as i32),
                    &trade.exchange,
                    &trade.exchange_name,
                    &trade.conditions,
                    &money(trade.premium, 2),
                    &trade.trade_type.as_str(),
                    &trade.execution_level.as_str(),
                    &(trade.priority as i16),
                    &trade.highlight,
                    &(trade.urgency.score as i16),
                    &trade.urgency.level.as_str(),
                    &trade.flow_direction.as_str(),
                    &trade.sweep_id,
                    &(trade.sweep_size as i32),
                    &(trade.sweep_exchange_count as i32),
                    &trade.sweep_exchanges,
                    &trade.is_block,
                    &trade.block_reason.map(|r| r.as_str()),
                    &executed_at,
                    &trade_date,
                ],
            )
            .await?;
        Ok(rows == 1)
    }

    /// Atomic increments for one stored trade on its rollover date.
    pub async fn apply_daily_delta(
        &self,
        date: NaiveDate,
        delta: &AggregateDelta,
    ) -> Result<(), StorageError> {
        self.client
            .execute(
                &self.apply_daily,
                &[
                    &date,
                    &delta.total_trades,
                    &money(delta.total_premium, 2),
                    &delta.call_count,
                    &money(delta.call_premium, 2),
                    &delta.put_count,
                    &money(delta.put_premium, 2),
                    &delta.sweep_count,
                    &money(delta.sweep_premium, 2),
                    &delta.block_count,
                    &money(delta.block_premium, 2),
                    &delta.flow_count,
                    &money(delta.flow_premium, 2),
                    &delta.priority_counts[0],
                    &money(delta.priority_premiums[0], 2),
                    &delta.priority_counts[1],
                    &money(delta.priority_premiums[1], 2),
                    &delta.priority_counts[2],
                    &money(delta.priority_premiums[2], 2),
                    &delta.priority_counts[3],
                    &money(delta.priority_premiums[3], 2),
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn daily_summary(
        &self,
        date: NaiveDate,
    ) -> Result<Option<DailySummary>, StorageError> {
        let row = self.client.query_opt(SELECT_DAILY_SQL, &[&date]).await?;
        Ok(row.map(|row| DailySummary {
            date,
            total_trades: row.get(0),
            total_premium: decimal_to_f64(row.get(1)),
            call_count: row.get(2),
            call_premium: decimal_to_f64(row.get(3)),
            put_count: row.get(4),
            put_premium: decimal_to_f64(row.get(5)),
            sweep_count: row.get(6),
            sweep_premium: decimal_to_f64(row.get(7)),
            block_count: row.get(8),
            block_premium: decimal_to_f64(row.get(9)),
            flow_count: row.get(10),
            flow_premium: decimal_to_f64(row.get(11)),
            priority_counts: [row.get(12), row.get(14), row.get(16), row.get(18)],
            priority_premiums: [
                decimal_to_f64(row.get(13)),
                decimal_to_f64(row.get(15)),
                decimal_to_f64(row.get(17)),
                decimal_to_f64(row.get(19)),
            ],
        }))
    }

    /// Drop every row dated before `date` from both tables. Returns the
    /// number of trades removed.
    pub async fn purge_before(&self, date: NaiveDate) -> Result<u64, StorageError> {
        let trades = self
            .client
            .execute("DELETE FROM trades WHERE trade_date < $1", &[&date])
            .await?;
        self.client
            .execute("DELETE FROM daily_aggregates WHERE date < $1", &[&date])
            .await?;
        Ok(trades)
    }
}

/// Per-trade increments destined for `daily_aggregates`. Kept pure so the
/// arithmetic is testable without a database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateDelta {
    pub total_trades: i64,
    pub total_premium: f64,
    pub call_count: i64,
    pub call_premium: f64,
    pub put_count: i64,
    pub put_premium: f64,
    pub sweep_count: i64,
    pub sweep_premium: f64,
    pub block_count: i64,
    pub block_premium: f64,
    pub flow_count: i64,
    pub flow_premium: f64,
    pub priority_counts: [i64; 4],
    pub priority_premiums: [f64; 4],
}

impl AggregateDelta {
    pub fn from_trade(trade: &ClassifiedTrade) -> Self {
        let mut delta = Self {
            total_trades: 1,
            total_premium: trade.premium,
            ..Self::default()
        };
        match trade.contract.side {
            OptionSide::Call => {
                delta.call_count = 1;
                delta.call_premium = trade.premium;
            }
            OptionSide::Put => {
                delta.put_count = 1;
                delta.put_premium = trade.premium;
            }
        }
        match trade.trade_type {
            TradeType::Sweep => {
                delta.sweep_count = 1;
                delta.sweep_premium = trade.premium;
            }
            TradeType::Block => {
                delta.block_count = 1;
                delta.block_premium = trade.premium;
            }
            TradeType::Flow => {
                delta.flow_count = 1;
                delta.flow_premium = trade.premium;
            }
        }
        let bucket = (trade.priority.clamp(1, 4) - 1) as usize;
        delta.priority_counts[bucket] = 1;
        delta.priority_premiums[bucket] = trade.premium;
        delta
    }
}

/// Read model over one `daily_aggregates` row. Ratios are derived here, on
/// read, and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub total_trades: i64,
    pub total_premium: f64,
    pub call_count: i64,
    pub call_premium: f64,
    pub put_count: i64,
    pub put_premium: f64,
    pub sweep_count: i64,
    pub sweep_premium: f64,
    pub block_count: i64,
    pub block_premium: f64,
    pub flow_count: i64,
    pub flow_premium: f64,
    pub priority_counts: [i64; 4],
    pub priority_premiums: [f64; 4],
}

impl DailySummary {
    /// Call premium over put premium; None while no put premium printed.
    pub fn call_put_ratio(&self) -> Option<f64> {
        (self.put_premium > 0.0).then(|| self.call_premium / self.put_premium)
    }

    /// Share of premium that arrived as sweeps or blocks.
    pub fn institutional_share(&self) -> f64 {
        if self.total_premium <= 0.0 {
            return 0.0;
        }
        (self.sweep_premium + self.block_premium) / self.total_premium
    }
}

/// Resolve the configured IANA zone.
pub fn parse_timezone(name: &str) -> Result<Tz, StorageError> {
    name.parse::<Tz>()
        .map_err(|_| StorageError::Timezone(name.to_string()))
}

/// The rollover date a trade belongs to: its wall-clock date in the
/// operator's exchange timezone.
pub fn trade_date(trade_ts_ms: i64, tz: &Tz) -> NaiveDate {
    DateTime::<Utc>::from_timestamp_millis(trade_ts_ms)
        .unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH)
        .with_timezone(tz)
        .date_naive()
}

fn money(value: f64, dp: u32) -> Decimal {
    Decimal::from_f64_retain(value).unwrap_or_default().round_dp(dp)
}

fn decimal_to_f64(value: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    value.to_f64().unwrap_or(0.0)
}
