//! Signal provider seams.
//!
//! Each signal category is read through its own trait so the sampler never
//! touches host globals directly. Tick-time sources are synchronous and must
//! not block; the static probe is async because some hosts only expose
//! capability checks asynchronously.

use crate::collector::types::{
    ActivityReading, BatteryReading, MemoryReading, NetworkReading, StaticSnapshot,
};
use async_trait::async_trait;
use thiserror::Error;

/// Why a single host signal could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("signal not supported by host")]
    NotSupported,
    #[error("permission denied")]
    PermissionDenied,
    #[error("signal disabled by configuration")]
    Disabled,
    #[error("read failed: {0}")]
    ReadFailed(String),
}

/// Why the static snapshot could not be captured at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("host probe unavailable: {0}")]
    Unavailable(String),
    #[error("host probe failed: {0}")]
    Failed(String),
}

/// Captures the session-invariant facts.
#[async_trait]
pub trait StaticProbe: Send + Sync {
    async fn capture(&self) -> Result<StaticSnapshot, ProbeError>;
}

pub trait NetworkSource: Send + Sync {
    fn read(&self) -> Result<NetworkReading, SignalError>;
}

pub trait MemorySource: Send + Sync {
    fn read(&self) -> Result<MemoryReading, SignalError>;
}

pub trait ActivitySource: Send + Sync {
    fn read(&self) -> Result<ActivityReading, SignalError>;
}

pub trait BatterySource: Send + Sync {
    fn read(&self) -> Result<BatteryReading, SignalError>;
}

#[async_trait]
impl<P: StaticProbe + ?Sized> StaticProbe for std::sync::Arc<P> {
    async fn capture(&self) -> Result<StaticSnapshot, ProbeError> {
        (**self).capture().await
    }
}

#[async_trait]
impl<P: StaticProbe + ?Sized> StaticProbe for Box<P> {
    async fn capture(&self) -> Result<StaticSnapshot, ProbeError> {
        (**self).capture().await
    }
}

impl<S: NetworkSource + ?Sized> NetworkSource for std::sync::Arc<S> {
    fn read(&self) -> Result<NetworkReading, SignalError> {
        (**self).read()
    }
}

impl<S: MemorySource + ?Sized> MemorySource for std::sync::Arc<S> {
    fn read(&self) -> Result<MemoryReading, SignalError> {
        (**self).read()
    }
}

impl<S: ActivitySource + ?Sized> ActivitySource for std::sync::Arc<S> {
    fn read(&self) -> Result<ActivityReading, SignalError> {
        (**self).read()
    }
}

impl<S: BatterySource + ?Sized> BatterySource for std::sync::Arc<S> {
    fn read(&self) -> Result<BatteryReading, SignalError> {
        (**self).read()
    }
}

/// A source that always reports the signal as disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSource;

impl NetworkSource for DisabledSource {
    fn read(&self) -> Result<NetworkReading, SignalError> {
        Err(SignalError::Disabled)
    }
}

impl MemorySource for DisabledSource {
    fn read(&self) -> Result<MemoryReading, SignalError> {
        Err(SignalError::Disabled)
    }
}

impl ActivitySource for DisabledSource {
    fn read(&self) -> Result<ActivityReading, SignalError> {
        Err(SignalError::Disabled)
    }
}

impl BatterySource for DisabledSource {
    fn read(&self) -> Result<BatteryReading, SignalError> {
        Err(SignalError::Disabled)
    }
}

/// One source per continuous signal category.
pub struct SignalSources {
    pub network: Box<dyn NetworkSource>,
    pub memory: Box<dyn MemorySource>,
    pub activity: Box<dyn ActivitySource>,
    pub battery: Box<dyn BatterySource>,
}

impl SignalSources {
    /// Replace the sources switched off in `sources` with [`DisabledSource`].
    pub fn restrict_to(mut self, sources: &crate::config::SourceConfig) -> Self {
        if !sources.network {
            self.network = Box::new(DisabledSource);
        }
        if !sources.memory {
            self.memory = Box::new(DisabledSource);
        }
        if !sources.activity {
            self.activity = Box::new(DisabledSource);
        }
        if !sources.battery {
            self.battery = Box::new(DisabledSource);
        }
        self
    }
}

impl std::fmt::Debug for SignalSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSources").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;

    #[test]
    fn test_disabled_source_reports_disabled() {
        assert_eq!(NetworkSource::read(&DisabledSource), Err(SignalError::Disabled));
        assert_eq!(BatterySource::read(&DisabledSource), Err(SignalError::Disabled));
    }

    #[test]
    fn test_restrict_to_disables_unselected() {
        let sources = crate::collector::synthetic::SyntheticSignals::steady()
            .into_sources()
            .restrict_to(&SourceConfig::from_csv("network"));
        assert!(sources.network.read().is_ok());
        assert_eq!(sources.memory.read(), Err(SignalError::Disabled));
        assert_eq!(sources.activity.read(), Err(SignalError::Disabled));
    }
}
