// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Builds every collaborator, wires them, and owns the process lifecycle.
//! Ownership is explicit: each component gets its handles here and nothing
//! reaches for process-wide state.

use crate::AppError;
use aggregator::WindowConfig;
use broadcast_hub::BroadcastHub;
use classifier::Classifier;
use core_types::config::AppConfig;
use flow_service::FlowPipeline;
use log::{error, info};
use metrics::Metrics;
use quote_cache::QuoteCache;
use std::sync::Arc;
use storage::purge::PurgeTask;
use storage::sink::PersistenceSink;
use storage::TradeStore;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use ws_farm::{FarmConfig, IngestionFarm};

pub async fn run(cfg: AppConfig) -> Result<(), AppError> {
    info!(
        "optflow booting: {} sessions ({} static, {} quote channels each), feed {}",
        cfg.sessions_total, cfg.sessions_static, cfg.quotes_per_session, cfg.ws_url
    );
    info!(
        "loaded api key (len={}), store {}, rollover zone {}",
        cfg.api_key.len(),
        cfg.store_url,
        cfg.rollover_timezone
    );

    let cancel = CancellationToken::new();
    let metrics = Arc::new(Metrics::new());

    let metrics_listener = TcpListener::bind(&cfg.metrics_addr).await?;
    info!("metrics listening on {}", cfg.metrics_addr);
    let metrics_server = {
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            if let Err(err) = metrics.serve(metrics_listener).await {
                error!("metrics server failed: {err}");
            }
        })
    };

    // Store must be reachable at boot; anything else here is fatal.
    let tz = storage::parse_timezone(&cfg.rollover_timezone)?;
    let (store, _store_driver) = TradeStore::connect(&cfg.store_url).await?;
    store.ping().await?;
    let store = Arc::new(store);
    info!("options store reachable");

    let quote_cache = Arc::new(QuoteCache::new(cfg.quote_cache_capacity));
    let hub = Arc::new(BroadcastHub::new(cfg.subscriber_outbox_capacity));

    let (sink_tx, sink_rx) = mpsc::channel(cfg.sink_queue_capacity);
    let sink = PersistenceSink::new(
        Arc::clone(&store),
        cfg.store_threshold,
        tz,
        Arc::clone(&metrics),
    );
    metrics.register_service_status(sink.status_handle());
    let sink_task = tokio::spawn(sink.run(sink_rx));

    let purge_task = tokio::spawn(PurgeTask::new(Arc::clone(&store), tz).run(cancel.clone()));

    let (farm, shard_rxs) = IngestionFarm::new(
        FarmConfig::from_app(&cfg),
        Arc::clone(&quote_cache),
        Arc::clone(&metrics),
    );
    metrics.register_service_status(farm.status_handle());

    let pipeline = FlowPipeline::new(
        window_config(&cfg),
        Classifier::default(),
        Arc::clone(&quote_cache),
        Arc::clone(&hub),
        sink_tx,
        Arc::clone(&metrics),
    );
    let shard_tasks = pipeline.spawn(shard_rxs);

    let mut farm_task = tokio::spawn(farm.run(cancel.clone()));

    let farm_result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received; draining in-flight trades");
            cancel.cancel();
            farm_task.await
        }
        result = &mut farm_task => {
            cancel.cancel();
            result
        }
    };

    // Farm exit dropped the shard senders: workers drain, then the sink
    // queue closes and pending inserts complete.
    for task in shard_tasks {
        let _ = task.await;
    }
    let _ = sink_task.await;
    let _ = purge_task.await;
    metrics_server.abort();

    match farm_result {
        Ok(Ok(())) => {
            info!("optflow stopped cleanly");
            Ok(())
        }
        Ok(Err(err)) => Err(err.into()),
        Err(join_err) => {
            error!("ingestion farm task failed: {join_err}");
            Ok(())
        }
    }
}

fn window_config(cfg: &AppConfig) -> WindowConfig {
    WindowConfig {
        buffer_max_size: cfg.buffer_max_size,
        buffer_max_age_ms: cfg.buffer_max_age_ms,
        sweep_window_ms: cfg.sweep_window_ms,
        sweep_price_delta: cfg.sweep_price_delta,
        sweep_min_total: cfg.sweep_min_total,
        sweep_min_exchanges: cfg.sweep_min_exchanges,
        block_min_size: cfg.block_min_size,
        block_isolation_ms: cfg.block_isolation_ms,
        block_conditions: cfg.block_conditions.clone(),
        dark_venues: cfg.dark_venues.clone(),
    }
}
