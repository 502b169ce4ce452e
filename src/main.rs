//! # Tandem Application Entry Point
//!
//! ## Environment Variables
//!
//! - `DATABASE_URL` - PostgreSQL connection string (required)
//! - `REDIS_URL` - Redis connection string (required)
//! - `ADDRESS` - HTTP bind address (required)
//! - `RUST_LOG` - Logging level (optional, defaults to `info`)
//! - `LOG_FORMAT` - Log format, either `json` or `plain` (optional, defaults to `plain`)
//! - `SERVICE_NAME` - Service name stamped on JSON log records (optional,
//!   defaults to the crate name)
//!
//! Matchmaking tunables (`MAX_WAIT_TIME`, `INITIAL_DELAY`, `MAX_RETRIES`,
//! `COMPATIBILITY_THRESHOLD`, `CACHE_TTL`, rate-limiter and
//! circuit-breaker settings) are documented in `config.rs`.

use std::env;
use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::PgPool;
use tandem::config::WorkerConfig;
use tandem::services::{
    CircuitBreaker, FindMatchService, MetricsRecorder, PollingMatchNotifier,
    ProcessRequestService, RateLimiter, RedisBroker,
};
use tandem::state::AppState;
use tandem::stores::{InMemoryStateStore, MatchStore, RedisQueueStore, SqlxUnitOfWorkFactory};
use tandem::worker::{MatchRequestHandler, run_consumer};
use tandem::{app, stores::QueueStore};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, instrument};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
#[instrument]
async fn main() {
    dotenvy::dotenv().ok(); // doesn't override existing env vars

    // 1. Set up tracing subscriber for logging
    init_tracing();

    let config = WorkerConfig::from_env();

    // 2. Connect to the durable store and run migrations
    let db_pool = PgPool::connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("Failed to run database migrations");
    info!("Connected to PostgreSQL database");

    // 3. Connect to the queue store / broker
    let redis_client =
        redis::Client::open(config.redis_url.as_str()).expect("Invalid REDIS_URL");
    let redis_conn = ConnectionManager::new(redis_client)
        .await
        .expect("Failed to connect to Redis");
    info!("Connected to Redis");

    // 4. Install the metrics recorder before anything emits
    let metrics = MetricsRecorder::install();

    // 5. Composition root: stores, services, handler
    let queue: Arc<dyn QueueStore> = Arc::new(RedisQueueStore::new(
        redis_conn.clone(),
        config.matching.cache_ttl,
        config.matching.max_wait_time,
    ));
    let matches = MatchStore::new(db_pool.clone());
    let states = Arc::new(InMemoryStateStore::new(config.state_store.clone()));
    states.spawn_sweeper();

    let broker = RedisBroker::new(redis_conn);
    let publisher = Arc::new(broker.clone());
    let uow_factory = Arc::new(SqlxUnitOfWorkFactory::new(db_pool));

    let find_match = FindMatchService::new(Arc::clone(&queue), config.matching.clone());
    let process = Arc::new(ProcessRequestService::new(
        find_match,
        uow_factory.clone(),
        Arc::clone(&queue),
        Arc::clone(&states),
        publisher.clone(),
        Arc::new(PollingMatchNotifier::new(Arc::clone(&queue))),
        config.matching.clone(),
    ));
    let handler = Arc::new(MatchRequestHandler::new(
        process,
        RateLimiter::from_config(&config.resilience),
        CircuitBreaker::from_config(&config.resilience),
    ));

    // 6. Start the broker consumer
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = tokio::spawn(run_consumer(broker, handler, shutdown_rx));

    // 7. Start the HTTP server
    let state = Arc::new(AppState::new(
        queue,
        matches,
        states,
        publisher,
        uow_factory,
        metrics.handle(),
        config.clone(),
    ));
    let router = app(state);

    let listener = TcpListener::bind(&config.address).await.unwrap();
    info!("Server starting at http://{}", config.address);

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    // 8. Drain the consumer before exit
    let _ = shutdown_tx.send(true);
    let _ = consumer.await;
    info!("Shutdown complete");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl-c");
    info!("Shutdown signal received");
}

/// Tracing setup for the worker.
///
/// `RUST_LOG` drives the filter. `LOG_FORMAT=json` switches to bunyan
/// output for log shipping; several worker deployments can share one
/// pipeline, so the bunyan service name is taken from `SERVICE_NAME` and
/// falls back to the crate name.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);

    if env::var("LOG_FORMAT").as_deref() == Ok("json") {
        let service_name =
            env::var("SERVICE_NAME").unwrap_or_else(|_| env!("CARGO_PKG_NAME").to_string());
        registry
            .with(tracing_bunyan_formatter::JsonStorageLayer)
            .with(tracing_bunyan_formatter::BunyanFormattingLayer::new(
                service_name,
                std::io::stdout,
            ))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(false))
            .init();
    }

    info!("Tracing initialized");
}
