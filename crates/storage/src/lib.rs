pub mod db;
pub mod error;
pub mod metrics;
pub mod sink;
pub mod writer;

pub use error::StorageError;
pub use metrics::StorageMetrics;
pub use sink::{PgSink, RowSink};
pub use writer::StorageWriter;
