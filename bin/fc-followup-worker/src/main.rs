//! Outreach follow-up engine process entry point.
//!
//! Wires the IMAP poll, reply pipeline, and scheduled dispatch loops into
//! one process behind an HTTP health/metrics server, the same shape as
//! `fc-scheduler-server`: `AppConfig::load()`, build the dependency graph,
//! start the Supervisor, serve `/q/health*` until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Json, Router};
use fc_cache::{Debouncer, DedupGuard, ScheduleIndex};
use fc_config::AppConfig;
use fc_decision::GroqAnalyzer;
use fc_dispatch::Dispatcher;
use fc_mailbox::{ImapSmtpClientPool, MailboxClient, Poller};
use fc_pipeline::{Pipeline, Supervisor, SupervisorConfig};
use fc_standby::{LeaderElection, LeaderElectionConfig, StandbyGuard};
use fc_store::{postgres::PostgresThreadStore, sqlite::SqliteThreadStore, ThreadStore};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    supervisor_running: bool,
    schedule_index_depth: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fc_common::logging::init_logging("fc-followup-worker");

    info!("starting outreach follow-up engine");

    let config = AppConfig::load()?;

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    if config.database.url.starts_with("postgres") {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url)
            .await?;
        let store = Arc::new(PostgresThreadStore::new(pool));
        store.init_schema().await?;
        info!("using PostgreSQL thread store");
        run(config, store, metrics_handle).await
    } else {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(&config.database.url)
            .await?;
        let store = Arc::new(SqliteThreadStore::new(pool));
        store.init_schema().await?;
        info!("using SQLite thread store");
        run(config, store, metrics_handle).await
    }
}

/// Builds every dependency behind the Pipeline/Dispatcher/Supervisor and
/// runs the process until a shutdown signal arrives. Generic over the
/// concrete `ThreadStore` backend so the Postgres and SQLite branches in
/// `main` share one implementation instead of two.
async fn run<S: ThreadStore + 'static>(
    config: AppConfig,
    store: Arc<S>,
    metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
) -> anyhow::Result<()> {
    let debouncer: Arc<Debouncer> = Arc::new(Debouncer::connect(&config.redis.url).await?);
    let dedup: Arc<DedupGuard> = Arc::new(DedupGuard::connect(&config.redis.url).await?);
    let schedule = Arc::new(ScheduleIndex::connect(&config.redis.url).await?);

    let analyzer = Arc::new(GroqAnalyzer::new(
        config.classifier.groq_api_key.clone(),
        config.classifier.groq_model.clone(),
    )?);

    let mailboxes = Arc::new(ImapSmtpClientPool::new(
        config.accounts.clone(),
        config.transport.clone(),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        dedup,
        schedule.clone(),
        mailboxes.clone(),
    ));

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        debouncer,
        analyzer,
        dispatcher.clone(),
        schedule.clone(),
        mailboxes.clone(),
        Arc::new(fc_common::NullTrainingDataSink),
        config.runtime.max_concurrent_workers,
    ));

    let poll_clients: Vec<(String, Arc<dyn MailboxClient>)> = mailboxes
        .accounts()
        .map(|email| -> anyhow::Result<(String, Arc<dyn MailboxClient>)> {
            let client = mailboxes.get(email)?;
            Ok((email.to_string(), client as Arc<dyn MailboxClient>))
        })
        .collect::<anyhow::Result<_>>()?;
    let poller = Arc::new(Poller::new(poll_clients));

    let election = Arc::new(
        LeaderElection::new(
            LeaderElectionConfig::new(config.redis.url.clone())
                .with_lock_key("followups:schedule-sync:leader".to_string())
                // `redis_sync_lock` TTL per spec §6: 14 min, <= sync period (15 min) - 60s.
                .with_lock_ttl_seconds(14 * 60)
                .with_heartbeat_interval_seconds(2 * 60),
        )
        .await?,
    );
    election.clone().start().await?;
    let standby = Arc::new(StandbyGuard::new(election));

    let supervisor_config = SupervisorConfig {
        polling_interval: Duration::from_secs(config.runtime.polling_interval_seconds),
        dispatch_interval: Duration::from_secs(config.runtime.schedule_sync_interval_seconds),
        schedule_sync_interval: Duration::from_secs(config.runtime.schedule_sync_interval_seconds),
        max_concurrent_dispatches: config.runtime.max_concurrent_workers,
        ..SupervisorConfig::default()
    };

    let supervisor = Arc::new(Supervisor::new(
        supervisor_config,
        store,
        poller,
        pipeline,
        dispatcher,
        schedule.clone(),
        standby,
    ));
    supervisor.start().await;

    let health_supervisor = supervisor.clone();
    let health_schedule = schedule.clone();
    let app = Router::new()
        .route(
            "/q/health",
            get(move || {
                let supervisor = health_supervisor.clone();
                let schedule = health_schedule.clone();
                async move {
                    let running = supervisor.is_running().await;
                    let depth = schedule.len().await.ok();
                    Json(HealthResponse {
                        status: if running { "UP".to_string() } else { "DOWN".to_string() },
                        supervisor_running: running,
                        schedule_index_depth: depth,
                    })
                }
            }),
        )
        .route("/q/health/live", get(|| async { Json(serde_json::json!({"status": "UP"})) }))
        .route("/q/health/ready", get(|| async { Json(serde_json::json!({"status": "UP"})) }))
        .route("/metrics", get(move || async move { metrics_handle.render() }));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http.port));
    info!(?addr, "HTTP server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(supervisor))
        .await?;

    info!("outreach follow-up engine stopped");
    Ok(())
}

async fn shutdown_signal<S: ThreadStore + 'static>(supervisor: Arc<Supervisor<S>>) {
    tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
    info!("shutdown signal received, draining in-flight work");
    supervisor.stop().await;
    tokio::time::sleep(supervisor.shutdown_drain_deadline()).await;
}
