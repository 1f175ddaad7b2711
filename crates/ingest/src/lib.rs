pub mod api;
pub mod metrics;
pub mod router;
pub mod state;

pub use metrics::IngestMetrics;
pub use router::build_router;
pub use state::AppState;
