use chrono::{DateTime, Utc};

/// A record to be appended to the log.
///
/// The key determines partition placement: records with equal keys land in
/// the same partition, and delivery order within a partition matches
/// production order.
#[derive(Debug, Clone)]
pub struct Record {
    pub topic: String,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
    /// Event-time timestamp carried on the log record.
    pub timestamp: DateTime<Utc>,
}

impl Record {
    pub fn new(
        topic: impl Into<String>,
        key: impl Into<Vec<u8>>,
        payload: Vec<u8>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
            timestamp,
        }
    }
}

/// Broker acknowledgement for a produced record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub partition: i32,
    pub offset: i64,
}

/// A record delivered to a consumer, with its position in the log.
#[derive(Debug, Clone)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    /// Monotonic per-partition position of this record.
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ConsumedRecord {
    /// The commit entry acknowledging this record: the next offset to read.
    pub fn commit_offset(&self) -> CommitOffset {
        CommitOffset {
            topic: self.topic.clone(),
            partition: self.partition,
            next_offset: self.offset + 1,
        }
    }
}

/// An explicit consumer-group offset commit for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOffset {
    pub topic: String,
    pub partition: i32,
    /// First offset that has NOT yet been processed.
    pub next_offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_offset_points_past_record() {
        let record = ConsumedRecord {
            topic: "events".into(),
            partition: 3,
            offset: 41,
            key: Some(b"api".to_vec()),
            payload: b"{}".to_vec(),
            timestamp: None,
        };
        let commit = record.commit_offset();
        assert_eq!(commit.partition, 3);
        assert_eq!(commit.next_offset, 42);
    }
}
