//! The storage writer: a fetcher task and a batch-writer task cooperating
//! over a bounded channel.
//!
//! The fetcher pulls records from the consumer group and queues them; the
//! writer accumulates a batch and flushes on size or on a timer. Offsets are
//! committed only after the sink transaction succeeds, and a failed batch
//! stays in memory and is retried in place, so a later flush can never
//! commit the group past unwritten records. Every delivered record either
//! lands as a row or its offset stays put for redelivery (at-least-once;
//! the table tolerates duplicates).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use helios_core::codec;
use helios_core::config::WriterConfig;
use helios_core::Event;
use helios_rohrpost::{CommitOffset, LogConsumer};

use crate::error::StorageError;
use crate::metrics::StorageMetrics;
use crate::sink::RowSink;

/// Back-off after a fetch error.
const FETCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Back-off between insert retries while a full batch is blocking intake.
const INSERT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// One log record flowing from fetcher to writer.
///
/// `event` is `None` for undecodable payloads; they still occupy an offset
/// slot so the commit watermark stays ordered per partition.
struct QueuedRecord {
    event: Option<Event>,
    partition: i32,
    offset: i64,
}

pub struct StorageWriter {
    consumer: Arc<dyn LogConsumer>,
    sink: Arc<dyn RowSink>,
    topic: String,
    config: WriterConfig,
    metrics: StorageMetrics,
}

impl StorageWriter {
    pub fn new(
        consumer: Arc<dyn LogConsumer>,
        sink: Arc<dyn RowSink>,
        topic: impl Into<String>,
        config: WriterConfig,
        metrics: StorageMetrics,
    ) -> Self {
        Self {
            consumer,
            sink,
            topic: topic.into(),
            config,
            metrics,
        }
    }

    /// Run until the shutdown signal flips, then drain the channel, flush
    /// the final batch, and commit its offsets.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), StorageError> {
        info!(
            topic = %self.topic,
            batch_size = self.config.batch_size,
            flush_interval_ms = self.config.flush_interval_ms,
            channel_capacity = self.config.channel_capacity,
            shedding = self.config.allow_shedding,
            "storage writer started"
        );

        let (tx, rx) = mpsc::channel::<QueuedRecord>(self.config.channel_capacity.max(1));

        let writer_handle = tokio::spawn(write_loop(
            rx,
            self.consumer.clone(),
            self.sink.clone(),
            self.topic.clone(),
            self.config.clone(),
            self.metrics.clone(),
            shutdown.clone(),
        ));

        self.fetch_loop(tx, &mut shutdown).await;

        // Dropping the sender above lets the writer drain and exit.
        if let Err(e) = writer_handle.await {
            error!(error = %e, "writer task panicked");
        }

        info!("storage writer stopped");
        Ok(())
    }

    async fn fetch_loop(
        &self,
        tx: mpsc::Sender<QueuedRecord>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("fetcher stopping");
                        break;
                    }
                }
                result = self.consumer.next() => {
                    match result {
                        Ok(record) => {
                            let queued = match codec::parse(&record.payload) {
                                Ok(event) => {
                                    self.metrics
                                        .events_consumed
                                        .with_label_values(&["queued"])
                                        .inc();
                                    QueuedRecord {
                                        event: Some(event),
                                        partition: record.partition,
                                        offset: record.offset,
                                    }
                                }
                                Err(e) => {
                                    // Provably bad: skip the row but keep the
                                    // offset slot so the group moves past it.
                                    warn!(
                                        partition = record.partition,
                                        offset = record.offset,
                                        error = %e,
                                        "undecodable event payload"
                                    );
                                    self.metrics
                                        .events_consumed
                                        .with_label_values(&["unmarshal_error"])
                                        .inc();
                                    QueuedRecord {
                                        event: None,
                                        partition: record.partition,
                                        offset: record.offset,
                                    }
                                }
                            };

                            if self.enqueue(&tx, queued).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "fetch error, backing off");
                            self.metrics
                                .events_consumed
                                .with_label_values(&["fetch_error"])
                                .inc();
                            tokio::time::sleep(FETCH_RETRY_DELAY).await;
                        }
                    }
                }
            }
        }
    }

    /// Queue one record for the writer. Default policy blocks until the
    /// writer catches up; with shedding enabled, events are dropped (and
    /// their offsets committed) after the shed timeout.
    async fn enqueue(
        &self,
        tx: &mpsc::Sender<QueuedRecord>,
        queued: QueuedRecord,
    ) -> Result<(), ()> {
        if !self.config.allow_shedding {
            return tx.send(queued).await.map_err(|_| ());
        }

        match tx
            .send_timeout(queued, Duration::from_secs(self.config.shed_timeout_secs))
            .await
        {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(dropped)) => {
                warn!(
                    partition = dropped.partition,
                    offset = dropped.offset,
                    "batch channel saturated, shedding event"
                );
                self.metrics.events_dropped.inc();
                self.metrics
                    .events_consumed
                    .with_label_values(&["dropped"])
                    .inc();
                let commit = CommitOffset {
                    topic: self.topic.clone(),
                    partition: dropped.partition,
                    next_offset: dropped.offset + 1,
                };
                if let Err(e) = self.consumer.commit(&[commit]).await {
                    warn!(error = %e, "offset commit failed for shed event");
                }
                Ok(())
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(()),
        }
    }
}

async fn write_loop(
    mut rx: mpsc::Receiver<QueuedRecord>,
    consumer: Arc<dyn LogConsumer>,
    sink: Arc<dyn RowSink>,
    topic: String,
    config: WriterConfig,
    metrics: StorageMetrics,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut batch: Vec<QueuedRecord> = Vec::with_capacity(config.batch_size);
    let mut ticker =
        tokio::time::interval(Duration::from_millis(config.flush_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        // A full batch must land before we take more input. A failed flush
        // keeps the batch, so retry here until the sink recovers; the
        // bounded channel back-pressures the fetcher meanwhile. Shutdown
        // breaks out with the offsets uncommitted — redelivery after
        // restart covers the rest.
        while batch.len() >= config.batch_size {
            if flush_batch(&mut batch, &*consumer, &*sink, &topic, &metrics).await {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(INSERT_RETRY_DELAY) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        warn!(
                            pending = batch.len(),
                            "shutting down with a failing sink; offsets stay uncommitted"
                        );
                        return;
                    }
                }
            }
        }

        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(item) => batch.push(item),
                None => {
                    // Fetcher gone: one final attempt. A failure here
                    // leaves the offsets uncommitted for redelivery.
                    flush_batch(&mut batch, &*consumer, &*sink, &topic, &metrics).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                // A failed flush keeps the batch; the next tick retries.
                flush_batch(&mut batch, &*consumer, &*sink, &topic, &metrics).await;
            }
        }
    }
}

/// Flush one batch: sink transaction first, offsets second. Returns whether
/// the batch left memory. On sink failure the batch is KEPT — its offsets
/// stay uncommitted and no later flush on the same partition can commit
/// past it, because the records themselves are still in the batch.
async fn flush_batch(
    batch: &mut Vec<QueuedRecord>,
    consumer: &dyn LogConsumer,
    sink: &dyn RowSink,
    topic: &str,
    metrics: &StorageMetrics,
) -> bool {
    if batch.is_empty() {
        return true;
    }

    let events: Vec<Event> = batch.iter().filter_map(|q| q.event.clone()).collect();
    let start = Instant::now();
    let result = sink.insert_batch(&events).await;
    metrics.db_write_latency.observe(start.elapsed().as_secs_f64());
    metrics.batch_size.observe(events.len() as f64);

    match result {
        Ok(written) => {
            metrics
                .events_consumed
                .with_label_values(&["success"])
                .inc_by(written as u64);

            let mut high_water: HashMap<i32, i64> = HashMap::new();
            for queued in batch.iter() {
                let next = queued.offset + 1;
                let entry = high_water.entry(queued.partition).or_insert(next);
                if next > *entry {
                    *entry = next;
                }
            }
            let commits: Vec<CommitOffset> = high_water
                .into_iter()
                .map(|(partition, next_offset)| CommitOffset {
                    topic: topic.to_string(),
                    partition,
                    next_offset,
                })
                .collect();

            if let Err(e) = consumer.commit(&commits).await {
                warn!(error = %e, "offset commit failed; duplicates possible after restart");
            }

            info!(
                batch_size = batch.len(),
                rows = written,
                latency_ms = start.elapsed().as_millis() as u64,
                "batch written"
            );

            batch.clear();
            true
        }
        Err(e) => {
            error!(
                error = %e,
                batch_size = events.len(),
                "batch insert failed; keeping batch for retry, offsets not committed"
            );
            metrics
                .events_consumed
                .with_label_values(&["insert_retry"])
                .inc_by(events.len() as u64);
            false
        }
    }
}
