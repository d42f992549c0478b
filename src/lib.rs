//! Session Telemetry Agent - periodic host telemetry with inferred scores.
//!
//! This library captures a one-time snapshot of session-invariant host facts,
//! samples time-varying host signals on a fixed period, derives heuristic
//! scores from the sample history, and flattens everything into a fixed,
//! versioned column schema.
//!
//! # Collection Guarantees
//!
//! - **Injected providers**: every signal is read through a provider trait
//! - **Unavailable is data**: a signal that cannot be read is recorded, not retried
//! - **In memory only**: samples live for the lifetime of the agent
//! - **Transparency**: collection counts are logged and auditable
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Session Telemetry Agent                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │  Collector  │──▶│   Sampler   │──▶│   Scorer    │        │
//! │  │ (providers) │   │  (ticker)   │   │ (every N)   │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! │         │                 │                 │               │
//! │         ▼                 ▼                 ▼               │
//! │  ┌─────────────┐   ┌─────────────────────────────┐          │
//! │  │Transparency │   │    Exporter (flat rows)     │          │
//! │  │    Log      │   │                             │          │
//! │  └─────────────┘   └─────────────────────────────┘          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use session_telemetry_agent::{
//!     collector::{SyntheticProbe, SyntheticSignals},
//!     AgentConfig, TelemetryAgent,
//! };
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), session_telemetry_agent::AgentError> {
//! let agent = TelemetryAgent::new(
//!     SyntheticProbe::laptop(),
//!     SyntheticSignals::steady().into_sources(),
//!     AgentConfig::default(),
//! );
//!
//! agent.initialize().await?;
//! agent.on_derived(|derived| {
//!     println!("risk: {:?}", derived.risk_level);
//!     Ok(())
//! });
//! agent.start(Duration::from_secs(5))?;
//! tokio::time::sleep(Duration::from_secs(60)).await;
//! agent.stop();
//!
//! let csv = agent.export_delimited_text();
//! # let _ = csv;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod collector;
pub mod config;
pub mod core;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use agent::{AgentConfig, AgentError, CallbackError, CallbackKind, TelemetryAgent};
pub use collector::{
    ContinuousSample, ProbeError, Reading, SignalError, SignalSources, StaticProbe, StaticSnapshot,
};
pub use config::{Config, ConfigError, SourceConfig};
pub use core::{infer, DerivedTelemetry, FlatRecord, RiskLevel, SCHEMA_VERSION};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name reported as the producer of exported data.
pub const PRODUCER_NAME: &str = "session-telemetry-agent";

/// Collection declaration that can be displayed to users.
pub const COLLECTION_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║        SESSION TELEMETRY AGENT - COLLECTION DECLARATION          ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This agent records host telemetry for the current session.      ║
║                                                                  ║
║  ✓ CAPTURED ONCE PER SESSION:                                    ║
║    • CPU core count, memory size, platform and OS version        ║
║    • Display size and host capability flags                      ║
║                                                                  ║
║  ✓ SAMPLED PERIODICALLY:                                         ║
║    • Connectivity, connection type and round-trip time           ║
║    • Memory usage                                                ║
║    • Visibility and focus state                                  ║
║    • Battery level and charging state                            ║
║                                                                  ║
║  ✗ NEVER CAPTURED:                                               ║
║    • Page, window or screen content                              ║
║    • Keystrokes or cursor positions                              ║
║    • Network traffic contents                                    ║
║                                                                  ║
║  Samples are held in memory and only written when you export.    ║
║                                                                  ║
║  You can view collection statistics anytime with:                ║
║    telemetry-agent status                                        ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_declaration_contents() {
        assert!(COLLECTION_DECLARATION.contains("COLLECTION DECLARATION"));
        assert!(COLLECTION_DECLARATION.contains("NEVER CAPTURED"));
        assert!(COLLECTION_DECLARATION.contains("Battery level"));
    }
}
