//! Binary entry point: wires the Model Store Gateway, projection engine,
//! health tracker, feed pipeline, log ingestor, and event bus together and
//! drives them from the scheduler until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use hybridns_core::prelude::*;
use tokio::signal;
use tracing::Instrument;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("hybridns: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config)?;

    tracing::info!(service = %config.service.name, "starting hybridns control plane");

    match LibsqlStore::connect(&config.store, config.service.name.clone()).await {
        Ok(store) => serve(Arc::new(store), config).await,
        Err(e) if config.store.optional => {
            tracing::warn!(error = %e, "model store unavailable, falling back to in-memory store");
            serve(Arc::new(MemoryStore::with_service_name(config.service.name.clone())), config).await
        }
        Err(e) => Err(e),
    }
}

async fn serve<S>(store: Arc<S>, config: Config) -> Result<()>
where
    S: Store + Send + Sync + 'static,
{
    // Two independent `BackupStore`s: one serialises writes made through the
    // projection pipeline, the other drives the scheduled retention sweep.
    // Each guards its own index-file lock; they never run concurrently in
    // practice since backups happen far less often than the prune interval.
    let projection = Arc::new(ProjectionEngine::new(
        store.clone(),
        BackupStore::new(config.backup_root.clone()),
        RndcResolverControl::default(),
        config.bind_etc.clone(),
        Duration::from_secs(config.projection_lock_timeout_s as u64),
    ));
    let prune_backup = BackupStore::new(config.backup_root.clone());

    let health = Arc::new(HealthTracker::new(
        store.clone(),
        Duration::from_millis(config.dns_probe_timeout_ms as u64),
        Duration::from_millis(config.dns_probe_timeout_ms as u64 * 4),
        config.health_worker_count,
    ));

    let feed_pipeline = Arc::new(FeedPipeline::new(
        store.clone(),
        Duration::from_millis(config.dns_probe_timeout_ms as u64 * 20),
    ));

    let mut log_ingestor = LogIngestor::new(store.clone(), config.query_log_path.clone(), config.log_flush_batch as usize);

    let bus = Arc::new(EventBus::new(store.clone(), config.event_bus.clone()));

    let mut runtime = acton_reactive::prelude::ActonApp::launch();
    let worker = BackgroundWorker::spawn(&mut runtime)
        .await
        .map_err(|e| Error::StoreUnavailable(format!("background worker failed to start: {e}")))?;
    let scheduler = Scheduler::new(worker);

    {
        let health = health.clone();
        let bus = bus.clone();
        scheduler.schedule(HEALTH_PROBE_TICK, Duration::from_secs(config.health_probe_interval_s as u64), move || {
            let health = health.clone();
            let bus = bus.clone();
            async move {
                let transitions = health.run_sweep().await?;
                for transition in transitions {
                    tracing::info!(
                        forwarder = %transition.forwarder_name,
                        from = ?transition.old_status,
                        to = ?transition.new_status,
                        "forwarder health transition"
                    );
                    bus.emit(Event {
                        event_id: Uuid::new_v4(),
                        event_type: "forwarder.health_transition".to_string(),
                        category: EventCategory::Health,
                        severity: EventSeverity::Warning,
                        priority: EventPriority::High,
                        source: "health_tracker".to_string(),
                        data: serde_json::json!({
                            "forwarder": transition.forwarder_name,
                            "old_status": format!("{:?}", transition.old_status),
                            "new_status": format!("{:?}", transition.new_status),
                        }),
                        correlation_id: None,
                        trace_id: None,
                        created_at: chrono::Utc::now(),
                        persist: true,
                    })
                    .await?;
                }
                Ok(())
            }
        });
    }

    {
        let feed_pipeline = feed_pipeline.clone();
        let store = store.clone();
        let bus = bus.clone();
        let projection = projection.clone();
        scheduler.schedule(FEED_REFRESH_TICK, Duration::from_secs(config.feed_refresh_interval_s as u64), move || {
            let feed_pipeline = feed_pipeline.clone();
            let store = store.clone();
            let bus = bus.clone();
            let projection = projection.clone();
            async move {
                for feed in store.list_threat_feeds().await? {
                    if !feed.active {
                        continue;
                    }
                    // The feed's category doubles as the RPZ zone its rules
                    // are ingested into.
                    let rpz_zone = feed.feed_type.clone();
                    match feed_pipeline.refresh_feed(&feed, &rpz_zone).await {
                        Ok(outcome) => {
                            tracing::info!(
                                feed = %feed.name,
                                upserted = outcome.rows_upserted,
                                removed = outcome.rows_removed,
                                skipped = outcome.rows_skipped,
                                "threat feed refreshed"
                            );
                            if outcome.rpz_zone_changed {
                                if let Err(e) = projection.project_rpz_zone(&rpz_zone).await {
                                    tracing::warn!(feed = %feed.name, rpz_zone = %rpz_zone, error = %e, "failed to project rpz zone after feed refresh");
                                }
                                bus.emit(Event {
                                    event_id: Uuid::new_v4(),
                                    event_type: "feed.refreshed".to_string(),
                                    category: EventCategory::Security,
                                    severity: EventSeverity::Info,
                                    priority: EventPriority::Normal,
                                    source: "feed_pipeline".to_string(),
                                    data: serde_json::json!({
                                        "feed": feed.name,
                                        "rpz_zone": rpz_zone,
                                        "upserted": outcome.rows_upserted,
                                        "removed": outcome.rows_removed,
                                    }),
                                    correlation_id: None,
                                    trace_id: None,
                                    created_at: chrono::Utc::now(),
                                    persist: false,
                                })
                                .await?;
                            }
                        }
                        Err(e) => tracing::warn!(feed = %feed.name, error = %e, "threat feed refresh failed"),
                    }
                }
                Ok(())
            }
        });
    }

    {
        let retain_per_type = config.backup_retain_per_type as usize;
        let retain_days = config.backup_retain_days as i64;
        scheduler.schedule(BACKUP_PRUNE, Duration::from_secs(86_400), move || {
            let pruned_count = prune_backup.prune(retain_per_type, retain_days);
            async move {
                let pruned = pruned_count.await?;
                tracing::info!(pruned, "backup retention sweep complete");
                Ok(())
            }
        });
    }

    // The log ingestor owns a tail cursor (`&mut self`), so unlike the other
    // components it cannot be driven from a shared scheduler closure; it runs
    // on its own named background task instead, stopped via a shutdown
    // channel rather than an abort so its final `flush()` still runs. It
    // keeps the `query_log_rotate_check` task name (rotation detection lives
    // inside `tail_once` itself) for the same observability identity the
    // scheduler's other named tasks have, without the overlap-skip guard
    // those use — tailing must run every tick, never skip one.
    let (log_shutdown_tx, mut log_shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let query_log_task = tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = log_ingestor.tail_once().await {
                            tracing::warn!(error = %e, "query log tail failed");
                        }
                    }
                    _ = &mut log_shutdown_rx => break,
                }
            }
            if let Err(e) = log_ingestor.flush().await {
                tracing::warn!(error = %e, "final query log flush failed");
            }
        }
        .instrument(tracing::info_span!("background_task", name = QUERY_LOG_ROTATE_CHECK)),
    );

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining background tasks");

    let _ = log_shutdown_tx.send(());
    let _ = query_log_task.await;

    runtime
        .shutdown_all()
        .await
        .map_err(|e| Error::StoreUnavailable(format!("runtime shutdown failed: {e}")))?;

    shutdown_tracing();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, starting graceful shutdown"),
        _ = terminate => tracing::info!("received SIGTERM, starting graceful shutdown"),
    }
}
