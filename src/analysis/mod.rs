//! Per-repository analysis and report aggregation.

pub mod aggregator;
pub mod provider;

pub use aggregator::AggregationPipeline;
pub use provider::{AnalysisError, AnalysisProvider, GitFameProvider};
