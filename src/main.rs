use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use redis_mq::config::{DemoConfig, Settings};
use redis_mq::metrics::encode_metrics;
use redis_mq::queue::{Consumer, ConsumerOptions, Handler, Message, MessageStore, Producer, Topic};
use redis_mq::redis::RedisPool;
use redis_mq::telemetry::init_tracing;

/// Demo payload carried in message bodies
#[derive(Debug, Serialize, Deserialize)]
struct DemoMessage {
    name: String,
    age: u32,
}

struct LogHandler;

#[async_trait]
impl Handler for LogHandler {
    async fn handle_message(&self, message: Message) {
        match serde_json::from_slice::<DemoMessage>(message.body()) {
            Ok(body) => tracing::info!(
                message_id = %message.id(),
                name = %body.name,
                age = body.age,
                delay_time = message.delay_time(),
                "Received message"
            ),
            Err(e) => tracing::warn!(message_id = %message.id(), error = %e, "Unexpected message body"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;
    init_tracing(&settings.log)?;
    tracing::info!("Configuration loaded");

    let pool = Arc::new(RedisPool::new(settings.redis.clone())?);
    pool.ping().await?;
    tracing::info!(url = %pool.url(), "Connected to Redis");
    let store: Arc<dyn MessageStore> = pool;

    let token = CancellationToken::new();
    let topic = Topic::from_config(settings.consumer.topic.clone(), &settings.topic);

    let consumer = Consumer::new(
        token.clone(),
        store.clone(),
        topic.clone(),
        ConsumerOptions::from(&settings.consumer),
    );
    consumer.set_handler(Arc::new(LogHandler));

    let producer = Producer::with_topic_config(store, settings.topic.clone());
    let producer_handle = tokio::spawn(run_producer(
        producer,
        topic.name().to_string(),
        settings.demo.clone(),
        token.clone(),
    ));

    shutdown_signal().await;
    token.cancel();

    tracing::info!("Waiting for producer and consumer loops to finish...");
    let _ = producer_handle.await;
    consumer.wait_stopped().await;

    match encode_metrics() {
        Ok(metrics) => tracing::debug!(%metrics, "Final metrics"),
        Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn random_message() -> DemoMessage {
    let mut rng = rand::rng();
    DemoMessage {
        name: format!("name_{}", rng.random::<u32>()),
        age: rng.random_range(0..20),
    }
}

/// Publish one immediate and one delayed message per interval until cancelled.
async fn run_producer(producer: Producer, topic: String, config: DemoConfig, token: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_millis(config.publish_interval_ms.max(1)));
    let delay = chrono::Duration::milliseconds(config.delay_ms as i64);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::info!("Demo producer stopped");
                return;
            }
            _ = ticker.tick() => {
                let body = match serde_json::to_vec(&random_message()) {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode demo message");
                        continue;
                    }
                };

                if let Err(e) = producer.publish(&topic, body.clone()).await {
                    tracing::error!(error = %e, "Publish failed");
                }
                if let Err(e) = producer.publish_delay_msg(&topic, body, delay).await {
                    tracing::error!(error = %e, "Delayed publish failed");
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down");
        }
    }
}
