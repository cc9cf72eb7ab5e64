// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Prometheus metrics and the HTTP surface that exposes them. hyper v1.+

use core_types::status::{OverallStatus, ServiceStatusHandle, ServiceStatusSnapshot};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::warn;
use parking_lot::Mutex;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

pub struct Metrics {
    registry: Registry,
    pub trades_ingested: IntCounter,
    pub quotes_ingested: IntCounter,
    pub malformed_dropped: IntCounter,
    pub dedup_dropped: IntCounter,
    pub trades_classified: IntCounterVec,
    pub broadcast_delivered: IntCounter,
    pub broadcast_dropped: IntCounter,
    pub store_inserts: IntCounter,
    pub store_skipped_below_threshold: IntCounter,
    pub store_errors: IntCounter,
    pub reconnects: IntCounter,
    pub sessions_connected: IntGauge,
    pub session_subscriptions: IntGaugeVec,
    pub window_entries: IntGaugeVec,
    pub sink_queue_depth: IntGauge,
    uptime: IntGauge,
    start_time: Instant,
    statuses: Mutex<Vec<ServiceStatusHandle>>,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
            let c = IntCounter::with_opts(Opts::new(name, help)).expect("valid counter opts");
            registry.register(Box::new(c.clone())).expect("unique metric name");
            c
        }
        fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
            let g = IntGauge::with_opts(Opts::new(name, help)).expect("valid gauge opts");
            registry.register(Box::new(g.clone())).expect("unique metric name");
            g
        }

        let trades_classified = IntCounterVec::new(
            Opts::new("flow_trades_classified_total", "Classified trades by verdict"),
            &["trade_type"],
        )
        .expect("valid counter opts");
        registry
            .register(Box::new(trades_classified.clone()))
            .expect("unique metric name");
        let session_subscriptions = IntGaugeVec::new(
            Opts::new(
                "farm_session_subscriptions",
                "Quote channels currently subscribed per session",
            ),
            &["session"],
        )
        .expect("valid gauge opts");
        registry
            .register(Box::new(session_subscriptions.clone()))
            .expect("unique metric name");
        let window_entries = IntGaugeVec::new(
            Opts::new(
                "aggregator_window_entries",
                "Prints resident in the sliding window per shard",
            ),
            &["shard"],
        )
        .expect("valid gauge opts");
        registry
            .register(Box::new(window_entries.clone()))
            .expect("unique metric name");

        Self {
            trades_ingested: counter(
                &registry,
                "farm_trades_ingested_total",
                "Raw option trades accepted from the feed",
            ),
            quotes_ingested: counter(
                &registry,
                "farm_quotes_ingested_total",
                "Quote events written to the quote cache",
            ),
            malformed_dropped: counter(
                &registry,
                "farm_malformed_dropped_total",
                "Feed messages dropped as malformed",
            ),
            dedup_dropped: counter(
                &registry,
                "farm_dedup_dropped_total",
                "Trades dropped as duplicate (symbol, sequence)",
            ),
            trades_classified,
            broadcast_delivered: counter(
                &registry,
                "hub_events_delivered_total",
                "Events accepted into subscriber outboxes",
            ),
            broadcast_dropped: counter(
                &registry,
                "hub_events_dropped_total",
                "Events dropped for slow subscribers",
            ),
            store_inserts: counter(
                &registry,
                "store_inserts_total",
                "Classified trades upserted into the store",
            ),
            store_skipped_below_threshold: counter(
                &registry,
                "store_skipped_below_threshold_total",
                "Classified trades under the premium threshold",
            ),
            store_errors: counter(
                &registry,
                "store_errors_total",
                "Store write failures after retry",
            ),
            reconnects: counter(
                &registry,
                "farm_reconnects_total",
                "WebSocket session reconnect attempts",
            ),
            sessions_connected: gauge(
                &registry,
                "farm_sessions_connected",
                "Authenticated WebSocket sessions",
            ),
            session_subscriptions,
            window_entries,
            sink_queue_depth: gauge(
                &registry,
                "sink_queue_depth",
                "Classified trades waiting for the persistence sink",
            ),
            uptime: gauge(&registry, "process_uptime_seconds", "Seconds since boot"),
            start_time: Instant::now(),
            registry,
            statuses: Mutex::new(Vec::new()),
        }
    }

    pub fn register_service_status(&self, handle: ServiceStatusHandle) {
        self.statuses.lock().push(handle);
    }

    pub fn service_status_snapshots(&self) -> Vec<ServiceStatusSnapshot> {
        self.statuses.lock().iter().map(|h| h.snapshot()).collect()
    }

    /// True only while every registered component reports Ok.
    pub fn healthy(&self) -> bool {
        self.statuses
            .lock()
            .iter()
            .all(|h| h.overall() == OverallStatus::Ok)
    }

    pub fn render(&self) -> Vec<u8> {
        self.uptime.set(self.start_time.elapsed().as_secs() as i64);
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            warn!("metrics encode failed: {err}");
        }
        buffer
    }

    fn handle(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
        match req.uri().path() {
            "/metrics" => Response::builder()
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(self.render()))),
            "/healthz" => {
                let snapshots = self.service_status_snapshots();
                let connected = self.healthy();
                let body = serde_json::json!({
                    "connected": connected,
                    "services": snapshots,
                });
                let status = if connected {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Response::builder()
                    .status(status)
                    .header("Content-Type", "application/json")
                    .body(Full::new(Bytes::from(body.to_string())))
            }
            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::new())),
        }
    }

    pub async fn serve(
        self: &Arc<Self>,
        listener: TcpListener,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        loop {
            let (socket, _) = listener.accept().await?;
            let io = TokioIo::new(socket);
            let metrics = Arc::clone(self);
            let service = service_fn(move |req| {
                let metrics = Arc::clone(&metrics);
                async move { metrics.handle(req) }
            });
            tokio::spawn(async move {
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!("metrics connection error: {err:?}");
                }
            });
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
