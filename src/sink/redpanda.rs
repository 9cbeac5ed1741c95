//! Redpanda (Kafka-compatible) price publisher.
//!
//! Publishes every price update as JSON for external consumers. Sends are enqueued on the
//! producer and never awaited, so a slow broker cannot stall an observer tick.

use std::time::Duration;

use log::{error, info, warn};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};

use crate::config::RedpandaSettings;
use crate::models::PriceUpdate;

use super::SnapshotSink;

/// Publishes to `{topic_prefix}.prices`, keyed by pool id so one pool stays on one partition.
pub struct RedpandaPublisher {
    producer: FutureProducer,
    topic: String,
}

impl RedpandaPublisher {
    /// Create a new Redpanda publisher.
    ///
    /// Returns None if Redpanda is disabled in settings or the producer cannot be created.
    pub fn new(settings: &RedpandaSettings) -> Option<Self> {
        if !settings.enabled {
            info!("Redpanda publishing is disabled");
            return None;
        }

        info!("Connecting to Redpanda brokers: {}", settings.brokers);

        let producer: FutureProducer = match ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("message.timeout.ms", "5000")
            .set("queue.buffering.max.messages", "100000")
            .set("linger.ms", "5")
            .create()
        {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to create Redpanda producer: {}", e);
                return None;
            },
        };

        let topic = Self::topic_for(&settings.topic_prefix);
        info!("Redpanda publisher initialized, publishing to {}", topic);

        Some(Self { producer, topic })
    }

    pub fn topic_for(prefix: &str) -> String {
        format!("{prefix}.prices")
    }

    /// Flush any pending messages (call on shutdown).
    pub fn flush(&self) {
        self.producer.flush(Duration::from_secs(5)).ok();
    }
}

impl SnapshotSink for RedpandaPublisher {
    fn on_snapshot(&self, update: &PriceUpdate) {
        let payload = match serde_json::to_string(update) {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to serialize price update for {}: {}", self.topic, e);
                return;
            },
        };

        let record = FutureRecord::to(&self.topic)
            .key(&update.pool_id)
            .payload(&payload);

        // Delivery status lands on the returned future, which nobody awaits.
        if let Err((e, _)) = self.producer.send_result(record) {
            warn!("Failed to enqueue message to {}: {}", self.topic, e);
        }
    }
}

impl Drop for RedpandaPublisher {
    fn drop(&mut self) {
        self.flush();
    }
}
