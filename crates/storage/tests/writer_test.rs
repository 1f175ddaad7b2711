//! Storage writer semantics against the in-memory log: every delivered
//! event becomes a row or its offset is withheld, bad payloads advance the
//! watermark, sink failures trigger redelivery, and shutdown drains.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use helios_core::config::WriterConfig;
use helios_core::{codec, Event};
use helios_rohrpost::{LogProducer, MemoryLog, Record};
use helios_storage::{RowSink, StorageError, StorageMetrics, StorageWriter};

const TOPIC: &str = "events";
const GROUP: &str = "storage-writers";

// ── Test sink ───────────────────────────────────────────────────────

#[derive(Default)]
struct MemorySink {
    rows: Mutex<Vec<Event>>,
    failing: AtomicBool,
}

impl MemorySink {
    fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl RowSink for MemorySink {
    async fn insert_batch(&self, events: &[Event]) -> Result<usize, StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Db(sqlx::Error::PoolTimedOut));
        }
        let mut rows = self.rows.lock().unwrap();
        rows.extend_from_slice(events);
        Ok(events.len())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn test_config() -> WriterConfig {
    WriterConfig {
        batch_size: 10,
        flush_interval_ms: 20,
        channel_capacity: 100,
        allow_shedding: false,
        shed_timeout_secs: 5,
    }
}

fn event_payload(service: &str, message: &str) -> Vec<u8> {
    let mut event = codec::parse(
        format!(r#"{{"service":"{service}","level":"INFO","message":"{message}"}}"#).as_bytes(),
    )
    .unwrap();
    codec::enrich(&mut event, "test-host", Utc::now());
    codec::encode(&event).unwrap()
}

async fn produce_events(log: &MemoryLog, service: &str, count: usize) {
    let producer = log.producer();
    for i in 0..count {
        producer
            .produce(Record::new(
                TOPIC,
                service.as_bytes().to_vec(),
                event_payload(service, &format!("m{i}")),
                Utc::now(),
            ))
            .await
            .unwrap();
    }
}

fn spawn_writer(
    log: &MemoryLog,
    sink: Arc<MemorySink>,
) -> (
    tokio::sync::watch::Sender<bool>,
    tokio::task::JoinHandle<Result<(), StorageError>>,
) {
    let consumer = Arc::new(log.consumer(TOPIC, GROUP));
    let writer = StorageWriter::new(
        consumer,
        sink,
        TOPIC,
        test_config(),
        StorageMetrics::new(),
    );
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(writer.run(rx));
    (tx, handle)
}

async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn every_delivered_event_becomes_a_row() {
    let log = MemoryLog::new(4);
    let sink = Arc::new(MemorySink::default());
    let (shutdown, handle) = spawn_writer(&log, sink.clone());

    produce_events(&log, "api", 25).await;

    assert!(
        wait_until(Duration::from_secs(3), || sink.row_count() == 25).await,
        "expected 25 rows, got {}",
        sink.row_count()
    );

    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_flushes_partial_batch() {
    let log = MemoryLog::new(2);
    let sink = Arc::new(MemorySink::default());

    // Large batch + long timer: nothing flushes until the drain.
    let consumer = Arc::new(log.consumer(TOPIC, GROUP));
    let writer = StorageWriter::new(
        consumer,
        sink.clone(),
        TOPIC,
        WriterConfig {
            batch_size: 1000,
            flush_interval_ms: 60_000,
            channel_capacity: 100,
            allow_shedding: false,
            shed_timeout_secs: 5,
        },
        StorageMetrics::new(),
    );
    let (shutdown, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(writer.run(rx));

    produce_events(&log, "auth", 7).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.row_count(), 0, "batch must still be buffered");

    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();
    assert_eq!(sink.row_count(), 7, "drain must flush the partial batch");
}

#[tokio::test]
async fn sink_failure_withholds_offsets_for_redelivery() {
    let log = MemoryLog::new(2);

    // First incarnation: sink down, nothing commits.
    let failing_sink = Arc::new(MemorySink::default());
    failing_sink.set_failing(true);
    let (shutdown, handle) = spawn_writer(&log, failing_sink.clone());

    produce_events(&log, "payments", 5).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();
    assert_eq!(failing_sink.row_count(), 0);

    // Restarted incarnation, healthy sink, same group: everything is
    // redelivered from the last committed offset.
    let healthy_sink = Arc::new(MemorySink::default());
    let (shutdown, handle) = spawn_writer(&log, healthy_sink.clone());

    assert!(
        wait_until(Duration::from_secs(3), || healthy_sink.row_count() == 5).await,
        "expected 5 redelivered rows, got {}",
        healthy_sink.row_count()
    );

    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn failed_batch_is_retried_before_later_batches_commit() {
    // Single partition: the failed batch and the later traffic share it.
    let log = MemoryLog::new(1);
    let sink = Arc::new(MemorySink::default());
    sink.set_failing(true);
    let (shutdown, handle) = spawn_writer(&log, sink.clone());

    // Exactly one full batch; its insert fails and it must stay queued.
    let producer = log.producer();
    for i in 0..10 {
        producer
            .produce(Record::new(
                TOPIC,
                b"api".to_vec(),
                event_payload("api", &format!("early-{i}")),
                Utc::now(),
            ))
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sink.row_count(), 0, "failing sink must hold the batch");

    // The sink recovers while the process keeps running, and more traffic
    // arrives on the same partition.
    sink.set_failing(false);
    for i in 0..10 {
        producer
            .produce(Record::new(
                TOPIC,
                b"api".to_vec(),
                event_payload("api", &format!("late-{i}")),
                Utc::now(),
            ))
            .await
            .unwrap();
    }

    // Every event lands: the failed batch first, then the later one.
    assert!(
        wait_until(Duration::from_secs(5), || sink.row_count() == 20).await,
        "expected all 20 rows after recovery, got {}",
        sink.row_count()
    );
    {
        let rows = sink.rows.lock().unwrap();
        assert!(
            rows[..10].iter().all(|e| e.message.starts_with("early-")),
            "failed batch must flush before later traffic"
        );
    }

    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();

    // Offsets advanced only after everything was written: a fresh group
    // member has nothing to redeliver.
    let sink2 = Arc::new(MemorySink::default());
    let (shutdown, handle) = spawn_writer(&log, sink2.clone());
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();
    assert_eq!(sink2.row_count(), 0, "no redelivery after a clean recovery");
}

#[tokio::test]
async fn undecodable_payloads_skip_the_row_but_advance_the_group() {
    let log = MemoryLog::new(1);
    let producer = log.producer();

    // Two garbage payloads surrounding one good event, all in one partition.
    producer
        .produce(Record::new(TOPIC, b"api".to_vec(), b"not json".to_vec(), Utc::now()))
        .await
        .unwrap();
    producer
        .produce(Record::new(
            TOPIC,
            b"api".to_vec(),
            event_payload("api", "good"),
            Utc::now(),
        ))
        .await
        .unwrap();
    producer
        .produce(Record::new(TOPIC, b"api".to_vec(), b"{}".to_vec(), Utc::now()))
        .await
        .unwrap();

    let sink = Arc::new(MemorySink::default());
    let (shutdown, handle) = spawn_writer(&log, sink.clone());

    assert!(wait_until(Duration::from_secs(3), || sink.row_count() == 1).await);
    // Let the flush commit land before shutdown.
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();

    // A fresh group member finds nothing left to redeliver.
    let sink2 = Arc::new(MemorySink::default());
    let (shutdown, handle) = spawn_writer(&log, sink2.clone());
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();
    assert_eq!(sink2.row_count(), 0, "offsets must be past the bad payloads");
}

#[tokio::test]
async fn restart_after_kill_reaches_at_least_once() {
    let log = MemoryLog::new(4);
    produce_events(&log, "api", 40).await;

    // First writer processes some of the stream, then is killed without a
    // graceful drain.
    let sink = Arc::new(MemorySink::default());
    let consumer = Arc::new(log.consumer(TOPIC, GROUP));
    let writer = StorageWriter::new(
        consumer,
        sink.clone(),
        TOPIC,
        test_config(),
        StorageMetrics::new(),
    );
    let (_shutdown, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(writer.run(rx));
    wait_until(Duration::from_secs(3), || sink.row_count() >= 10).await;
    handle.abort();
    let _ = handle.await;
    // Let the orphaned batch-writer finish its drain before counting.
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Replacement writer resumes from the last commit. Duplicates are
    // allowed; lost messages are not — the union must cover all 40.
    let sink2 = Arc::new(MemorySink::default());
    let (shutdown, handle) = spawn_writer(&log, sink2.clone());

    let unique_messages = || {
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        for event in sink.rows.lock().unwrap().iter() {
            seen.insert(event.message.clone());
        }
        for event in sink2.rows.lock().unwrap().iter() {
            seen.insert(event.message.clone());
        }
        seen.len()
    };

    assert!(
        wait_until(Duration::from_secs(3), || unique_messages() == 40).await,
        "union of rows must cover all 40 events, got {}",
        unique_messages()
    );
    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();
}
