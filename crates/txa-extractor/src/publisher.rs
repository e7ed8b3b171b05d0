//! Broker publishing
//!
//! The pipeline only ever hands over a whole committed chunk. The Kafka
//! implementation enqueues the batch in order, then waits for a delivery
//! report for every message before declaring the batch published.

use async_trait::async_trait;
use rdkafka::{
    config::RDKafkaLogLevel,
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
    ClientConfig,
};
use tracing::{debug, error, info};
use txa_common::types::OutgoingMessage;

use crate::config::KafkaConfig;
use crate::error::{ExtractError, ExtractResult};

/// Publish-only view of the broker
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `messages` to the configured topic.
    ///
    /// Returns only once every message is acknowledged, or fails with
    /// [`ExtractError::PublishFailure`].
    async fn publish(&self, messages: &[OutgoingMessage]) -> ExtractResult<()>;
}

pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
}

fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("client.id", &config.client_id)
        .set("acks", "all")
        .set("enable.idempotence", "true")
        .set("message.timeout.ms", config.message_timeout_ms.to_string())
        .set("message.max.bytes", config.message_max_bytes.to_string())
        .set_log_level(RDKafkaLogLevel::Warning);
    client_config
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig) -> ExtractResult<Self> {
        let producer: FutureProducer = client_config(config)
            .create()
            .map_err(|e| ExtractError::Config(format!("Failed to create Kafka producer: {e}")))?;

        info!(
            brokers = %config.bootstrap_servers,
            topic = %config.topic,
            "Kafka producer created"
        );

        Ok(Self {
            producer,
            topic: config.topic.clone(),
        })
    }
}

fn headers_for(message: &OutgoingMessage) -> OwnedHeaders {
    message
        .headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(message.headers.len()), |headers, (key, value)| {
            headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_str()),
            })
        })
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(&self, messages: &[OutgoingMessage]) -> ExtractResult<()> {
        let total = messages.len();
        let mut deliveries = Vec::with_capacity(total);
        let mut enqueue_error = None;

        for message in messages {
            let record = FutureRecord::to(&self.topic)
                .key(&message.key)
                .payload(message.payload.as_ref())
                .headers(headers_for(message));

            match self.producer.send_result(record) {
                Ok(delivery) => deliveries.push((message.key.as_str(), delivery)),
                Err((err, _)) => {
                    error!(key = %message.key, error = %err, "Failed to enqueue message");
                    enqueue_error = Some(err.to_string());
                    break;
                },
            }
        }

        // Whatever was enqueued is in flight; wait for it so the count is accurate.
        let mut published = 0;
        let mut delivery_error = None;
        for (key, delivery) in deliveries {
            match delivery.await {
                Ok(Ok(_)) => published += 1,
                Ok(Err((err, _))) => {
                    error!(%key, error = %err, "Message delivery failed");
                    delivery_error.get_or_insert_with(|| err.to_string());
                },
                Err(_) => {
                    error!(%key, "Delivery report dropped by producer");
                    delivery_error.get_or_insert_with(|| "delivery canceled".to_string());
                },
            }
        }

        if let Some(reason) = enqueue_error.or(delivery_error) {
            return Err(ExtractError::PublishFailure {
                published,
                total,
                reason,
            });
        }

        debug!(published, topic = %self.topic, "Batch published");
        Ok(())
    }
}
