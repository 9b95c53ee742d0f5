use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_events::config::{AppConfig, ObservabilityConfig};
use order_events::consumer::EventConsumer;
use order_events::demo::run_demo;
use order_events::domain::order::{register_order_handlers, AutoAdvance, HandlerContext};
use order_events::events::{EventDispatcher, HandlerRegistry};
use order_events::health::ConsumerHealth;
use order_events::messaging::{BrokerConnector, DeadLetterSink, EventPublisher, KafkaConnector, MessageSink, RedpandaSink};
use order_events::metrics::{self, Metrics};
use order_events::notify::LoggingNotifier;
use order_events::store::InMemoryOrderStore;
use order_events::utils::CircuitBreakerConfig;

fn init_tracing(config: &ObservabilityConfig) {
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=order_events=trace cargo run
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,order_events=debug"));
    let json = config.log_format == "json";

    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json().with_target(true).with_thread_ids(true)))
        .with((!json).then(|| fmt::layer().with_target(true).with_thread_ids(true)))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.observability);

    tracing::info!("🚀 Starting order lifecycle engine");
    tracing::info!(brokers = %config.broker.brokers, queues = ?config.consumer.queues, "Configuration loaded");

    // === 1. Initialize Prometheus metrics ===
    let metrics = Arc::new(Metrics::new()?);

    // === 2. Redpanda producer (with circuit breaker) ===
    let breaker_metrics = metrics.clone();
    let sink: Arc<dyn MessageSink> = Arc::new(
        RedpandaSink::new(&config.broker, CircuitBreakerConfig::default())?.with_breaker_hook(move |from, to| {
            breaker_metrics.circuit_breaker_state.set(to.as_gauge());
            breaker_metrics
                .circuit_breaker_transitions
                .with_label_values(&[&format!("{:?}", from), &format!("{:?}", to)])
                .inc();
        }),
    );
    let publisher = EventPublisher::new(sink.clone(), config.broker.topic_prefix.clone(), metrics.clone());

    // === 3. Handlers ===
    let store = Arc::new(InMemoryOrderStore::new());
    tracing::warn!(
        demo = config.demo.enabled,
        "Order store is in-memory and starts empty: only orders seeded by the demo will apply, \
         events for any other order are acked and dropped as not found"
    );
    let auto_advance = (!config.handlers.auto_advance.is_empty())
        .then(|| AutoAdvance::new(publisher.clone(), config.handlers.auto_advance.iter().copied()));
    let ctx = HandlerContext {
        store: store.clone(),
        notifier: Arc::new(LoggingNotifier),
        metrics: metrics.clone(),
        auto_advance,
    };
    let registry = register_order_handlers(HandlerRegistry::builder(), &ctx)?.build();
    tracing::info!(event_types = ?registry.event_types(), "Handler registry built");
    let dispatcher = EventDispatcher::new(Arc::new(registry));

    // === 4. One consumer task per queue ===
    let connector: Arc<dyn BrokerConnector> = Arc::new(KafkaConnector::new(config.broker.clone()));
    let dead_letters = config
        .dead_letter_routing_key()
        .map(|key| DeadLetterSink::new(sink.clone(), key, metrics.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut health = ConsumerHealth::new();
    let mut consumers = Vec::new();

    for settings in config.consumer_settings() {
        let mut consumer = EventConsumer::new(settings, connector.clone(), dispatcher.clone(), metrics.clone());
        if let Some(sink) = &dead_letters {
            consumer = consumer.with_dead_letters(sink.clone());
        }
        health.register(consumer.queue(), consumer.subscribe_state());
        consumers.push(tokio::spawn(consumer.run(shutdown_rx.clone())));
    }

    // === 5. Metrics + health HTTP server in background thread ===
    if config.metrics.enabled {
        let registry = metrics.registry().clone();
        let port = config.metrics.port;
        let health = health.clone();
        std::thread::spawn(move || {
            let system = actix_web::rt::System::new();
            if let Err(e) = system.block_on(metrics::start_metrics_server(registry, health, port)) {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    // === 6. Optional demo ===
    if config.demo.enabled {
        let store = store.clone();
        let publisher = publisher.clone();
        tokio::spawn(async move {
            if let Err(e) = run_demo(&store, &publisher).await {
                tracing::error!(error = %e, "Demo failed");
            }
        });
    }

    // === 7. Run until Ctrl-C or until every consumer has exited ===
    let all = join_all(consumers);
    tokio::pin!(all);

    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            None
        }
        results = &mut all => Some(results),
    };

    let results = match finished {
        Some(results) => results,
        None => {
            tracing::info!("🛑 Shutdown requested, stopping consumers");
            shutdown_tx.send_replace(true);
            all.await
        }
    };

    let mut failed = 0;
    for result in results {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failed += 1;
                tracing::error!(error = %e, "Consumer failed");
            }
            Err(e) => {
                failed += 1;
                tracing::error!(error = %e, "Consumer task panicked");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} consumer(s) failed", failed);
    }

    tracing::info!("👋 Shutdown complete");
    Ok(())
}
