//! Fraud Scoring Service - Main Entry Point
//!
//! Loads every model artifact, then serves predict, explain and info requests
//! over NATS request/reply and publishes fraud alerts. Requests are processed
//! in parallel, bounded by a semaphore and a per-request timeout.

use anyhow::Result;
use async_nats::{Client, Subscriber};
use fraud_scoring_pipeline::{
    config::{AppConfig, LoggingConfig},
    consumer::{Operation, RequestConsumer},
    handlers::{HandlerContext, Reply},
    metrics::{MetricsReporter, PipelineMetrics},
    producer::{respond, AlertProducer},
    service::PredictionService,
    store::InMemoryTransactionStore,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging);

    info!("Starting Fraud Scoring Service");
    info!(
        fallback_threshold = config.detection.threshold,
        review_threshold = config.detection.review_threshold,
        failure_policy = ?config.ensemble.failure_policy,
        members = ?config.models.members,
        "Configuration loaded"
    );

    let metrics = Arc::new(PipelineMetrics::new());
    let store = Arc::new(InMemoryTransactionStore::new(config.store.capacity));

    // No traffic without a complete model set
    let service = match PredictionService::from_config(&config, store.clone()) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!(error = %e, "Model artifacts unavailable, refusing to start");
            return Err(e.into());
        }
    };

    let client = async_nats::connect(&config.nats.url).await?;
    info!("Connected to NATS at {}", config.nats.url);

    let producer = AlertProducer::new(client.clone(), &config.nats.alert_subject);
    info!("Publishing alerts to: {}", producer.subject());

    let ctx = HandlerContext {
        service,
        store,
        metrics: metrics.clone(),
        detection: config.detection.clone(),
    };

    let workers = config.pipeline.workers.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    let timeout = Duration::from_millis(config.pipeline.timeout_ms);
    info!(
        workers = workers,
        timeout_ms = config.pipeline.timeout_ms,
        "Starting request processing"
    );

    // Start metrics reporter (prints summary every 30 seconds)
    let reporter = MetricsReporter::new(metrics.clone(), 30);
    tokio::spawn(reporter.start());

    let subjects = [
        (&config.nats.predict_subject, Operation::Predict),
        (&config.nats.explain_subject, Operation::Explain),
        (&config.nats.info_subject, Operation::Info),
    ];
    let mut servers = Vec::with_capacity(subjects.len());
    for (subject, operation) in subjects {
        let consumer = RequestConsumer::new(client.clone(), subject, operation);
        let subscriber = consumer.subscribe().await?;
        servers.push(tokio::spawn(serve(
            subscriber,
            consumer.operation(),
            ServeContext {
                handlers: ctx.clone(),
                client: client.clone(),
                producer: producer.clone(),
                semaphore: semaphore.clone(),
                timeout,
            },
        )));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
        _ = futures::future::join_all(servers) => warn!("All subscriptions closed"),
    }

    info!("Service shutting down...");
    metrics.print_summary();

    Ok(())
}

/// JSON or pretty output per config; `RUST_LOG` overrides the level.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
}

#[derive(Clone)]
struct ServeContext {
    handlers: HandlerContext,
    client: Client,
    producer: AlertProducer,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
}

async fn serve(mut subscriber: Subscriber, operation: Operation, ctx: ServeContext) {
    while let Some(message) = subscriber.next().await {
        // Acquire permit (limits concurrent requests)
        let permit = match ctx.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let ctx = ctx.clone();

        tokio::spawn(async move {
            // Outlives the reply deadline; a late result still publishes its alert
            let processing = tokio::spawn(process(
                message.payload.to_vec(),
                operation,
                ctx.clone(),
                permit,
            ));

            let payload = match tokio::time::timeout(ctx.timeout, processing).await {
                Ok(Ok(payload)) => payload,
                Ok(Err(e)) => {
                    error!(operation = operation.as_str(), error = %e, "Request task failed");
                    ctx.handlers.internal_error_reply(operation.as_str())
                }
                Err(_) => ctx
                    .handlers
                    .timeout_reply(operation.as_str(), ctx.timeout.as_millis() as u64),
            };

            if let Err(e) = respond(&ctx.client, &message, payload).await {
                error!(operation = operation.as_str(), error = %e, "Failed to send reply");
            }
        });
    }
}

/// Run the handler on the blocking pool, publish any alert and return the
/// reply payload. The permit is released only when the handler returns.
async fn process(
    payload: Vec<u8>,
    operation: Operation,
    ctx: ServeContext,
    permit: OwnedSemaphorePermit,
) -> Vec<u8> {
    let handlers = ctx.handlers.clone();
    let work = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        handlers.handle(operation, &payload)
    });

    let reply = match work.await {
        Ok(reply) => reply,
        Err(e) => {
            error!(operation = operation.as_str(), error = %e, "Handler task panicked");
            Reply::plain(ctx.handlers.internal_error_reply(operation.as_str()))
        }
    };

    if let Some(alert) = &reply.alert {
        if let Err(e) = ctx.producer.publish(alert).await {
            error!(
                transaction_id = %alert.transaction_id,
                error = %e,
                "Failed to publish fraud alert"
            );
        }
    }

    reply.payload
}
