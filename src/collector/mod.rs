//! Signal collection for the session telemetry agent.
//!
//! This module defines the snapshot and sample types together with the
//! provider traits the sampler reads through. A deterministic synthetic
//! provider is always available; the native host provider sits behind the
//! `host` feature.

pub mod provider;
pub mod synthetic;
pub mod types;

#[cfg(feature = "host")]
pub mod host;

// Re-export commonly used types
pub use provider::{
    ActivitySource, BatterySource, DisabledSource, MemorySource, NetworkSource, ProbeError,
    SignalError, SignalSources, StaticProbe,
};
pub use synthetic::{Scripted, SyntheticProbe, SyntheticSignals, SyntheticSource};
pub use types::{
    ActivityReading, BatteryReading, BrowserInfo, ContinuousSample, DeviceInfo, DisplayInfo,
    MemoryReading, NetworkReading, Reading, StaticSnapshot,
};

#[cfg(feature = "host")]
pub use host::{host_sources, HostProbe};
