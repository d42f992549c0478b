//! Transparency module for the session telemetry agent.
//!
//! Tracks how much the agent collected so a user can audit it without
//! the log itself retaining any sample values.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, SharedTransparencyLog, TransparencyLog,
    TransparencyStats,
};
