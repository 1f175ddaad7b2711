//! Kafka implementation of the log adapter traits.
//!
//! Producer batching, compression, and acknowledgement level map directly
//! onto librdkafka settings; offsets are committed explicitly (auto-commit
//! disabled) so consumers control exactly when a record counts as processed.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info};

use helios_core::config::LogConfig;

use crate::error::LogError;
use crate::record::{Ack, CommitOffset, ConsumedRecord, Record};
use crate::traits::{LogConsumer, LogProducer};

/// Per-record delivery timeout (covers internal retries).
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Broker metadata probe timeout for health checks.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

// ── Producer ────────────────────────────────────────────────────────

/// Kafka-backed [`LogProducer`]. Cheap to clone; safe for concurrent callers.
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// Build a producer from the log section of the service config.
    pub fn new(config: &LogConfig) -> Result<Self, LogError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("acks", &config.acks)
            .set("compression.type", "snappy")
            .set("linger.ms", config.batch_timeout_ms.to_string())
            .set("batch.num.messages", config.batch_size.to_string())
            .set("message.send.max.retries", config.max_retries.to_string())
            .set("retry.backoff.ms", "100")
            .create()
            .map_err(|e| LogError::Config(e.to_string()))?;

        info!(
            brokers = %config.brokers.join(","),
            acks = %config.acks,
            linger_ms = config.batch_timeout_ms,
            "Kafka producer initialized"
        );

        Ok(Self { producer })
    }

    async fn send_one(&self, record: &Record) -> Result<Ack, LogError> {
        let future_record = FutureRecord::to(&record.topic)
            .key(&record.key)
            .payload(&record.payload)
            .timestamp(record.timestamp.timestamp_millis());

        match self
            .producer
            .send(future_record, Timeout::After(SEND_TIMEOUT))
            .await
        {
            Ok((partition, offset)) => {
                debug!(topic = %record.topic, partition, offset, "record produced");
                Ok(Ack { partition, offset })
            }
            Err((e, _unsent)) => Err(map_produce_error(e)),
        }
    }
}

#[async_trait]
impl LogProducer for KafkaProducer {
    async fn produce(&self, record: Record) -> Result<Ack, LogError> {
        self.send_one(&record).await
    }

    async fn produce_batch(&self, records: Vec<Record>) -> Result<Vec<Ack>, LogError> {
        let sends = records.iter().map(|r| self.send_one(r));
        let results = futures::future::join_all(sends).await;

        let mut acks = Vec::with_capacity(results.len());
        for result in results {
            acks.push(result?);
        }
        Ok(acks)
    }

    async fn flush(&self, timeout: Duration) -> Result<(), LogError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| LogError::Produce(format!("flush task failed: {e}")))?
            .map_err(|e| LogError::Produce(e.to_string()))
    }

    async fn health(&self) -> Result<(), LogError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, HEALTH_TIMEOUT)
                .map(|_| ())
        })
        .await
        .map_err(|e| LogError::Unavailable(format!("health task failed: {e}")))?
        .map_err(|e| LogError::Unavailable(e.to_string()))
    }
}

fn map_produce_error(e: KafkaError) -> LogError {
    match e {
        KafkaError::MessageProduction(code) => match code {
            RDKafkaErrorCode::QueueFull
            | RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::BrokerTransportFailure => LogError::Unavailable(code.to_string()),
            other => LogError::Produce(other.to_string()),
        },
        other => LogError::Produce(other.to_string()),
    }
}

// ── Consumer ────────────────────────────────────────────────────────

/// Kafka-backed [`LogConsumer`] joined to a consumer group.
///
/// Partition assignment within the group is the broker's business; the
/// adapter relies only on keyed placement, in-partition ordering, and
/// monotonic offsets.
pub struct KafkaConsumerAdapter {
    consumer: StreamConsumer,
}

impl KafkaConsumerAdapter {
    pub fn new(config: &LogConfig, topic: &str, group: &str) -> Result<Self, LogError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest")
            .create()
            .map_err(|e| LogError::Config(e.to_string()))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| LogError::Consume(e.to_string()))?;

        info!(topic, group, "Kafka consumer subscribed");
        Ok(Self { consumer })
    }
}

#[async_trait]
impl LogConsumer for KafkaConsumerAdapter {
    async fn next(&self) -> Result<ConsumedRecord, LogError> {
        let msg = self
            .consumer
            .recv()
            .await
            .map_err(|e| LogError::Consume(e.to_string()))?;

        Ok(ConsumedRecord {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg.key().map(|k| k.to_vec()),
            payload: msg.payload().map(|p| p.to_vec()).unwrap_or_default(),
            timestamp: msg
                .timestamp()
                .to_millis()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        })
    }

    async fn commit(&self, offsets: &[CommitOffset]) -> Result<(), LogError> {
        let mut list = TopicPartitionList::new();
        for commit in offsets {
            list.add_partition_offset(
                &commit.topic,
                commit.partition,
                Offset::Offset(commit.next_offset),
            )
            .map_err(|e| LogError::Commit(e.to_string()))?;
        }

        self.consumer
            .commit(&list, CommitMode::Sync)
            .map_err(|e| LogError::Commit(e.to_string()))
    }
}
