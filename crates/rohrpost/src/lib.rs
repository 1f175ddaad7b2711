pub mod error;
pub mod kafka;
pub mod memory;
pub mod record;
pub mod traits;

pub use error::LogError;
pub use kafka::{KafkaConsumerAdapter, KafkaProducer};
pub use memory::{MemoryConsumer, MemoryLog, MemoryProducer};
pub use record::{Ack, CommitOffset, ConsumedRecord, Record};
pub use traits::{LogConsumer, LogProducer};
