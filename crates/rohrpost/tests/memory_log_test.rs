//! Contract tests for the in-memory log: keyed placement, in-partition
//! ordering, consumer groups, committed-offset redelivery, and outage
//! injection. These are the guarantees every downstream component leans on.

use std::time::Duration;

use chrono::Utc;

use helios_rohrpost::{LogConsumer, LogProducer, MemoryLog, Record};

fn record(topic: &str, key: &str, payload: &str) -> Record {
    Record::new(topic, key.as_bytes().to_vec(), payload.as_bytes().to_vec(), Utc::now())
}

async fn recv(consumer: &impl LogConsumer) -> helios_rohrpost::ConsumedRecord {
    tokio::time::timeout(Duration::from_secs(2), consumer.next())
        .await
        .expect("timed out waiting for record")
        .expect("consumer error")
}

#[tokio::test]
async fn same_key_always_same_partition() {
    let log = MemoryLog::new(10);
    let producer = log.producer();

    let mut partitions = Vec::new();
    for i in 0..20 {
        let ack = producer
            .produce(record("events", "payments", &format!("p{i}")))
            .await
            .unwrap();
        partitions.push(ack.partition);
    }

    assert!(partitions.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn in_partition_order_matches_production_order() {
    let log = MemoryLog::new(4);
    let producer = log.producer();
    let consumer = log.consumer("events", "g1");

    for i in 0..5 {
        producer
            .produce(record("events", "api", &format!("{i}")))
            .await
            .unwrap();
    }

    for expected in 0..5 {
        let got = recv(&consumer).await;
        assert_eq!(got.payload, expected.to_string().as_bytes());
        assert_eq!(got.offset, expected);
    }
}

#[tokio::test]
async fn offsets_are_monotonic_per_partition() {
    let log = MemoryLog::new(1);
    let producer = log.producer();

    let a = producer.produce(record("events", "a", "1")).await.unwrap();
    let b = producer.produce(record("events", "b", "2")).await.unwrap();
    assert_eq!(a.partition, b.partition);
    assert_eq!(b.offset, a.offset + 1);
}

#[tokio::test]
async fn uncommitted_records_are_redelivered_to_the_group() {
    let log = MemoryLog::new(2);
    let producer = log.producer();

    for i in 0..4 {
        producer
            .produce(record("events", "auth", &format!("{i}")))
            .await
            .unwrap();
    }

    // First consumer reads two and commits only the first.
    let first = log.consumer("events", "writers");
    let r0 = recv(&first).await;
    let _r1 = recv(&first).await;
    first.commit(&[r0.commit_offset()]).await.unwrap();
    drop(first);

    // A replacement group member resumes from the commit: record 1 again.
    let second = log.consumer("events", "writers");
    let replayed = recv(&second).await;
    assert_eq!(replayed.payload, b"1");
}

#[tokio::test]
async fn distinct_groups_progress_independently() {
    let log = MemoryLog::new(2);
    let producer = log.producer();
    producer.produce(record("events", "api", "x")).await.unwrap();

    let storage = log.consumer("events", "storage-writers");
    let detector = log.consumer("events", "anomaly-detectors");

    // Both groups see the same record.
    assert_eq!(recv(&storage).await.payload, b"x");
    assert_eq!(recv(&detector).await.payload, b"x");
}

#[tokio::test]
async fn consumer_wakes_on_late_produce() {
    let log = MemoryLog::new(1);
    let consumer = log.consumer("events", "g");
    let producer = log.producer();

    let waiter = tokio::spawn(async move { consumer.next().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    producer.produce(record("events", "api", "late")).await.unwrap();

    let got = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("timed out")
        .unwrap()
        .unwrap();
    assert_eq!(got.payload, b"late");
}

#[tokio::test]
async fn injected_outage_fails_produce_until_recovery() {
    let log = MemoryLog::new(1);
    let producer = log.producer();

    log.set_failing(true);
    let err = producer.produce(record("events", "api", "x")).await.unwrap_err();
    assert!(err.is_transient());
    assert!(producer.health().await.is_err());

    log.set_failing(false);
    assert!(producer.produce(record("events", "api", "x")).await.is_ok());
    assert!(producer.health().await.is_ok());
    assert_eq!(log.record_count("events"), 1);
}

#[tokio::test]
async fn batch_produce_acks_every_record() {
    let log = MemoryLog::new(8);
    let producer = log.producer();

    let batch: Vec<Record> = (0..50)
        .map(|i| record("events", &format!("svc-{}", i % 5), "{}"))
        .collect();
    let acks = producer.produce_batch(batch).await.unwrap();
    assert_eq!(acks.len(), 50);
    assert_eq!(log.record_count("events"), 50);
}
