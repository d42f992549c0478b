//! Core functionality for the session telemetry agent.
//!
//! This module contains:
//! - The append-only sample sequence
//! - The sampler that composes samples and the ticker that drives it
//! - The scorer that infers derived telemetry from the samples
//! - The flat, fixed-column exporter

pub mod export;
pub mod sampler;
pub mod scorer;
pub mod sequence;

// Re-export commonly used types
pub use export::{
    flatten, header, to_delimited_text, FlatField, FlatRecord, RowSource, COLUMNS,
    DEFAULT_DELIMITER, SCHEMA_VERSION,
};
pub use sampler::{spawn_ticker, Sampler, TickerHandle, DEFAULT_SAMPLE_PERIOD};
pub use scorer::{
    infer, ConnectionQuality, DerivedTelemetry, DeviceClass, EngagementLevel, RiskLevel, Trend,
};
pub use sequence::SampleSequence;
