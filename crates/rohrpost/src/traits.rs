use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LogError;
use crate::record::{Ack, CommitOffset, ConsumedRecord, Record};

/// Appends records to a partitioned durable log.
///
/// Produce calls are synchronous from the caller's point of view: the
/// returned [`Ack`] means the broker has durably acknowledged the record at
/// the configured acknowledgement level. Implementations batch internally
/// within a short linger window and retry transient failures a bounded
/// number of times before surfacing them.
#[async_trait]
pub trait LogProducer: Send + Sync {
    /// Append one record. Returns the partition and offset it landed at.
    async fn produce(&self, record: Record) -> Result<Ack, LogError>;

    /// Append a batch as a single logical produce. Any failure fails the
    /// whole batch from the caller's perspective (redelivery is the
    /// caller's retry, duplicates are tolerated downstream).
    async fn produce_batch(&self, records: Vec<Record>) -> Result<Vec<Ack>, LogError>;

    /// Drain any internally buffered records. Called during shutdown.
    async fn flush(&self, timeout: Duration) -> Result<(), LogError>;

    /// Probe broker reachability. Backs the ingestion `/ready` endpoint.
    async fn health(&self) -> Result<(), LogError>;
}

/// Blanket implementation so `Arc<dyn LogProducer>` can be used directly.
#[async_trait]
impl<T: LogProducer + ?Sized> LogProducer for Arc<T> {
    async fn produce(&self, record: Record) -> Result<Ack, LogError> {
        (**self).produce(record).await
    }

    async fn produce_batch(&self, records: Vec<Record>) -> Result<Vec<Ack>, LogError> {
        (**self).produce_batch(records).await
    }

    async fn flush(&self, timeout: Duration) -> Result<(), LogError> {
        (**self).flush(timeout).await
    }

    async fn health(&self) -> Result<(), LogError> {
        (**self).health().await
    }
}

/// Reads records from a partitioned log as a member of a consumer group.
///
/// Offsets are committed explicitly, and only after the record's downstream
/// effect is durable — this is what makes delivery at-least-once. Not
/// calling [`LogConsumer::next`] pauses fetching, which is the adapter's
/// back-pressure mechanism.
#[async_trait]
pub trait LogConsumer: Send + Sync {
    /// Deliver the next record. Blocks until one is available.
    async fn next(&self) -> Result<ConsumedRecord, LogError>;

    /// Commit consumer-group offsets for the given partitions.
    async fn commit(&self, offsets: &[CommitOffset]) -> Result<(), LogError>;
}

/// Blanket implementation so `Arc<dyn LogConsumer>` can be used directly.
#[async_trait]
impl<T: LogConsumer + ?Sized> LogConsumer for Arc<T> {
    async fn next(&self) -> Result<ConsumedRecord, LogError> {
        (**self).next().await
    }

    async fn commit(&self, offsets: &[CommitOffset]) -> Result<(), LogError> {
        (**self).commit(offsets).await
    }
}
