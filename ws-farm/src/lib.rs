// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Multi-session WebSocket ingestion farm.
//!
//! Session 0 carries the global trade firehose; the leading sessions hold
//! static-tier quote subscriptions and the rest are filled by the volume
//! rebalancer. Quotes are written straight into the shared cache; trades
//! are deduplicated and fanned out to per-contract pipeline shards.

use core_types::config::AppConfig;
use core_types::status::ServiceStatusHandle;
use core_types::types::RawTrade;
use log::info;
use parking_lot::Mutex;
use quote_cache::QuoteCache;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Once;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub mod dispatcher;
pub mod protocol;
pub mod rebalance;
pub mod session;

use dispatcher::{AuthProgress, Dispatcher, VolumeTable};
use rebalance::{RebalanceConfig, Rebalancer};
use session::{spawn_session, SessionCommand, SessionHandle};

const EVENT_CHANNEL_CAPACITY: usize = 16_384;
const SHARD_CHANNEL_CAPACITY: usize = 4_096;

static TLS_PROVIDER_ONCE: Once = Once::new();

fn ensure_tls_provider() {
    TLS_PROVIDER_ONCE.call_once(|| {
        if let Err(err) = rustls::crypto::ring::default_provider().install_default() {
            panic!("failed to install rustls crypto provider: {err:?}");
        }
    });
}

#[derive(Debug, Error)]
pub enum FarmError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid upstream url: {0}")]
    Url(#[from] url::ParseError),
    #[error("no session authenticated within the reconnect budget")]
    AuthBarrier,
}

#[derive(Debug, Clone)]
pub struct FarmConfig {
    pub ws_url: String,
    pub api_key: String,
    pub sessions_total: usize,
    pub sessions_static: usize,
    pub quotes_per_session: usize,
    pub static_tier_tickers: Vec<String>,
    pub rebalance_interval_ms: u64,
    pub max_reconnect_attempts: usize,
    pub reconnect_interval_ms: u64,
    pub auth_grace_ms: u64,
    pub dedup_max_entries: usize,
    pub pipeline_shards: usize,
}

impl FarmConfig {
    pub fn from_app(cfg: &AppConfig) -> Self {
        Self {
            ws_url: cfg.ws_url.clone(),
            api_key: cfg.api_key.clone(),
            sessions_total: cfg.sessions_total,
            sessions_static: cfg.sessions_static,
            quotes_per_session: cfg.quotes_per_session,
            static_tier_tickers: cfg.static_tier_tickers.clone(),
            rebalance_interval_ms: cfg.rebalance_interval_ms,
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            reconnect_interval_ms: cfg.reconnect_interval_ms,
            auth_grace_ms: cfg.auth_grace_ms,
            dedup_max_entries: cfg.dedup_max_entries,
            pipeline_shards: cfg.pipeline_shards.max(1),
        }
    }
}

pub struct IngestionFarm {
    cfg: Arc<FarmConfig>,
    quote_cache: Arc<QuoteCache>,
    metrics: Arc<metrics::Metrics>,
    status: ServiceStatusHandle,
    shard_txs: Vec<mpsc::Sender<RawTrade>>,
}

impl IngestionFarm {
    /// Build the farm and hand back one trade receiver per pipeline shard.
    pub fn new(
        cfg: FarmConfig,
        quote_cache: Arc<QuoteCache>,
        metrics: Arc<metrics::Metrics>,
    ) -> (Self, Vec<mpsc::Receiver<RawTrade>>) {
        ensure_tls_provider();
        let mut shard_txs = Vec::with_capacity(cfg.pipeline_shards);
        let mut shard_rxs = Vec::with_capacity(cfg.pipeline_shards);
        for _ in 0..cfg.pipeline_shards {
            let (tx, rx) = mpsc::channel(SHARD_CHANNEL_CAPACITY);
            shard_txs.push(tx);
            shard_rxs.push(rx);
        }
        let farm = Self {
            cfg: Arc::new(cfg),
            quote_cache,
            metrics,
            status: ServiceStatusHandle::new("farm"),
            shard_txs,
        };
        (farm, shard_rxs)
    }

    pub fn status_handle(&self) -> ServiceStatusHandle {
        self.status.clone()
    }

    /// Open every session, wait for the auth barrier, subscribe the trade
    /// firehose on session 0, then run the rebalance loop until shutdown.
    /// Dropping the farm's shard senders on exit lets the pipeline drain.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), FarmError> {
        url::Url::parse(&self.cfg.ws_url)?;
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (auth_tx, mut auth_rx) = watch::channel(AuthProgress::default());
        let volume: VolumeTable = Arc::new(Mutex::new(HashMap::new()));

        let sessions: Vec<SessionHandle> = (0..self.cfg.sessions_total)
            .map(|id| spawn_session(id, Arc::clone(&self.cfg), event_tx.clone(), cancel.clone()))
            .collect();
        drop(event_tx);

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.quote_cache),
            Arc::clone(&self.metrics),
            self.status.clone(),
            self.shard_txs,
            Arc::clone(&volume),
            auth_tx,
            self.cfg.dedup_max_entries,
            self.cfg.sessions_total,
        );
        let dispatcher_task = tokio::spawn(dispatcher.run(event_rx));

        // Startup barrier: every session authenticated, or boot is fatal.
        loop {
            let progress = *auth_rx.borrow();
            if progress.exhausted > 0 {
                cancel.cancel();
                let _ = dispatcher_task.await;
                return Err(FarmError::AuthBarrier);
            }
            if progress.authenticated >= self.cfg.sessions_total {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = dispatcher_task.await;
                    return Ok(());
                }
                changed = auth_rx.changed() => {
                    if changed.is_err() {
                        let _ = dispatcher_task.await;
                        return Err(FarmError::AuthBarrier);
                    }
                }
            }
        }
        info!("session barrier complete; subscribing trade firehose");
        let _ = sessions[0]
            .commands
            .send(SessionCommand::Subscribe(vec![
                protocol::TRADE_FIREHOSE_CHANNEL.to_string(),
            ]))
            .await;

        let rebalancer = Rebalancer::new(
            RebalanceConfig {
                sessions_total: self.cfg.sessions_total,
                sessions_static: self.cfg.sessions_static,
                quotes_per_session: self.cfg.quotes_per_session,
                static_tier_tickers: self.cfg.static_tier_tickers.clone(),
                rebalance_interval_ms: self.cfg.rebalance_interval_ms,
            },
            volume,
            sessions,
            Arc::clone(&self.metrics),
        );
        rebalancer.run(cancel.clone()).await;

        // Sessions observe the same token and close; the dispatcher ends
        // once their event senders drop.
        let _ = dispatcher_task.await;
        info!("ingestion farm stopped");
        Ok(())
    }
}
