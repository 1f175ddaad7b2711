//! In-process implementation of the log adapter traits.
//!
//! A `MemoryLog` models exactly the contract the pipeline relies on: keyed
//! partition placement, in-partition ordering, monotonic offsets, and
//! consumer-group committed offsets with redelivery from the last commit.
//! It backs every downstream crate's tests and doubles as a local dev
//! broker; durability is out of scope here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::error::LogError;
use crate::record::{Ack, CommitOffset, ConsumedRecord, Record};
use crate::traits::{LogConsumer, LogProducer};

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Vec<u8>>,
    payload: Vec<u8>,
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct State {
    /// topic → partition → append-ordered records.
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    /// (group, topic, partition) → next offset to read.
    committed: HashMap<(String, String, i32), i64>,
}

struct Inner {
    partitions: usize,
    failing: AtomicBool,
    notify: Notify,
    state: Mutex<State>,
}

/// An in-process partitioned log shared by producers and consumers.
#[derive(Clone)]
pub struct MemoryLog {
    inner: Arc<Inner>,
}

impl MemoryLog {
    /// Create a log where every topic has `partitions` partitions.
    pub fn new(partitions: usize) -> Self {
        assert!(partitions > 0, "log needs at least one partition");
        Self {
            inner: Arc::new(Inner {
                partitions,
                failing: AtomicBool::new(false),
                notify: Notify::new(),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// A producer handle onto this log.
    pub fn producer(&self) -> MemoryProducer {
        MemoryProducer { log: self.clone() }
    }

    /// A consumer joined to `group` on `topic`, resuming from the group's
    /// committed offsets.
    pub fn consumer(&self, topic: impl Into<String>, group: impl Into<String>) -> MemoryConsumer {
        MemoryConsumer {
            log: self.clone(),
            topic: topic.into(),
            group: group.into(),
            positions: Mutex::new(HashMap::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Simulate a broker outage: while failing, every produce and health
    /// check returns `LogError::Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Deterministic partition placement for a key.
    pub fn partition_for_key(&self, key: &[u8]) -> i32 {
        (fnv1a(key) % self.inner.partitions as u64) as i32
    }

    /// Total records appended to a topic (all partitions). Test helper.
    pub fn record_count(&self, topic: &str) -> usize {
        let state = self.inner.state.lock().expect("memory log lock poisoned");
        state
            .topics
            .get(topic)
            .map(|parts| parts.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Snapshot every record in a topic in partition order. Test helper.
    pub fn dump(&self, topic: &str) -> Vec<ConsumedRecord> {
        let state = self.inner.state.lock().expect("memory log lock poisoned");
        let mut out = Vec::new();
        if let Some(parts) = state.topics.get(topic) {
            for (partition, records) in parts.iter().enumerate() {
                for (offset, record) in records.iter().enumerate() {
                    out.push(ConsumedRecord {
                        topic: topic.to_string(),
                        partition: partition as i32,
                        offset: offset as i64,
                        key: record.key.clone(),
                        payload: record.payload.clone(),
                        timestamp: record.timestamp,
                    });
                }
            }
        }
        out
    }

    fn append(&self, record: Record) -> Result<Ack, LogError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(LogError::Unavailable("broker offline (injected)".into()));
        }

        let partition = self.partition_for_key(&record.key);
        let ack = {
            let mut state = self.inner.state.lock().expect("memory log lock poisoned");
            let partitions = self.inner.partitions;
            let parts = state
                .topics
                .entry(record.topic)
                .or_insert_with(|| vec![Vec::new(); partitions]);
            let log = &mut parts[partition as usize];
            log.push(StoredRecord {
                key: Some(record.key),
                payload: record.payload,
                timestamp: Some(record.timestamp),
            });
            Ack {
                partition,
                offset: (log.len() - 1) as i64,
            }
        };

        self.inner.notify.notify_waiters();
        Ok(ack)
    }
}

/// FNV-1a: stable keyed partitioning, so same-service records always land
/// in the same partition within and across runs.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

// ── Producer ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MemoryProducer {
    log: MemoryLog,
}

#[async_trait]
impl LogProducer for MemoryProducer {
    async fn produce(&self, record: Record) -> Result<Ack, LogError> {
        self.log.append(record)
    }

    async fn produce_batch(&self, records: Vec<Record>) -> Result<Vec<Ack>, LogError> {
        let mut acks = Vec::with_capacity(records.len());
        for record in records {
            acks.push(self.log.append(record)?);
        }
        Ok(acks)
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), LogError> {
        Ok(())
    }

    async fn health(&self) -> Result<(), LogError> {
        if self.log.inner.failing.load(Ordering::SeqCst) {
            Err(LogError::Unavailable("broker offline (injected)".into()))
        } else {
            Ok(())
        }
    }
}

// ── Consumer ────────────────────────────────────────────────────────

/// A consumer-group member reading all partitions of one topic.
///
/// Fetch positions live in the consumer; committed offsets live in the log,
/// keyed by group. Dropping a consumer without committing and re-attaching
/// the group redelivers everything after the last commit.
pub struct MemoryConsumer {
    log: MemoryLog,
    topic: String,
    group: String,
    /// partition → next fetch offset (ahead of the committed offset).
    positions: Mutex<HashMap<i32, i64>>,
    /// Round-robin scan start, so one busy partition cannot starve others.
    cursor: AtomicUsize,
}

impl MemoryConsumer {
    fn try_next(&self) -> Option<ConsumedRecord> {
        let state = self.log.inner.state.lock().expect("memory log lock poisoned");
        let parts = state.topics.get(&self.topic)?;
        let mut positions = self.positions.lock().expect("positions lock poisoned");

        let n = parts.len();
        let start = self.cursor.load(Ordering::Relaxed);
        for i in 0..n {
            let partition = ((start + i) % n) as i32;
            let records = &parts[partition as usize];
            let pos = *positions.entry(partition).or_insert_with(|| {
                state
                    .committed
                    .get(&(self.group.clone(), self.topic.clone(), partition))
                    .copied()
                    .unwrap_or(0)
            });
            if (pos as usize) < records.len() {
                let record = &records[pos as usize];
                positions.insert(partition, pos + 1);
                self.cursor
                    .store((partition as usize + 1) % n, Ordering::Relaxed);
                return Some(ConsumedRecord {
                    topic: self.topic.clone(),
                    partition,
                    offset: pos,
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                    timestamp: record.timestamp,
                });
            }
        }
        None
    }
}

#[async_trait]
impl LogConsumer for MemoryConsumer {
    async fn next(&self) -> Result<ConsumedRecord, LogError> {
        loop {
            // Register for wakeups before checking, so an append landing
            // between the check and the await is not missed.
            let notified = self.log.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(record) = self.try_next() {
                return Ok(record);
            }
            notified.await;
        }
    }

    async fn commit(&self, offsets: &[CommitOffset]) -> Result<(), LogError> {
        let mut state = self.log.inner.state.lock().expect("memory log lock poisoned");
        for commit in offsets {
            state.committed.insert(
                (self.group.clone(), commit.topic.clone(), commit.partition),
                commit.next_offset,
            );
        }
        Ok(())
    }
}
