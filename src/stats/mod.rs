//! Source and sink statistics

pub mod metrics;

pub use metrics::{SinkStats, SourceStats};
