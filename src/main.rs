use idempotency_engine::api::{create_router, AppState};
use idempotency_engine::config::{Settings, SinkKind, StoreBackend};
use idempotency_engine::events::{DurableSink, KafkaSink, LogSink, ProducerConfig, SinkDispatcher};
use idempotency_engine::idempotency::IdempotencyEngine;
use idempotency_engine::observability::{init_logging, init_metrics, HealthChecker, LogConfig};
use idempotency_engine::store::{CacheStore, ExpirySweeper, InMemoryCacheStore, RedisCacheStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;

    init_logging(&LogConfig::new(
        settings.application.log_level.clone(),
        &settings.application.log_format,
    ));
    info!("Configuration loaded");

    let metrics_handle = init_metrics()?;
    let engine_config = settings.engine_config()?;

    // Cache store
    let mut sweeper = None;
    let cache: Arc<dyn CacheStore> = match settings.store.backend {
        StoreBackend::Redis => {
            info!("Connecting to Redis at {}...", settings.redis.url);
            let client = redis::Client::open(settings.redis.url.as_str())?;
            let store = RedisCacheStore::connect(&client).await?;
            store.ping().await?;
            info!("Redis connection established");
            Arc::new(store)
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory cache store; idempotency is not shared across processes");
            let store = InMemoryCacheStore::new();
            let interval = Duration::from_secs(settings.store.sweep_interval_secs);
            sweeper = Some(ExpirySweeper::new(store.clone(), interval).start());
            Arc::new(store)
        }
    };

    // Durable sink
    let (sink, sink_connected): (Arc<dyn DurableSink>, bool) = match settings.sink.kind {
        SinkKind::Log => (Arc::new(LogSink), true),
        SinkKind::Kafka => {
            let mut producer_config = ProducerConfig::default().with_brokers(&settings.sink.brokers);
            producer_config.topic = settings.sink.topic.clone();
            producer_config.retry_count = settings.sink.retry_count;
            producer_config.retry_delay_ms = settings.sink.retry_delay_ms;

            info!("Connecting to Kafka brokers {:?}...", producer_config.brokers);
            let kafka = KafkaSink::connect(producer_config).await?;
            let connected = kafka.is_connected();
            (Arc::new(kafka), connected)
        }
    };
    let sink_name = sink.name();
    let (dispatcher, worker) = SinkDispatcher::start(sink, settings.sink.queue_capacity);
    info!(sink = sink_name, "Durable sink started");

    let engine = Arc::new(IdempotencyEngine::new(cache.clone(), engine_config)?.with_sink(dispatcher));
    let health_checker = Arc::new(HealthChecker::new(cache, sink_name, sink_connected));

    let state = AppState::new(
        engine,
        health_checker,
        settings.idempotency.max_request_body_bytes,
    )
    .with_metrics(metrics_handle);
    let app = create_router(state);

    let addr = format!("{}:{}", settings.application.host, settings.application.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router (and every dispatcher clone) is gone; let the queue drain.
    worker.join().await;
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
