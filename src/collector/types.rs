//! Snapshot and sample types for the session telemetry agent.
//!
//! A session has exactly one [`StaticSnapshot`] and an ordered run of
//! [`ContinuousSample`]s. Sub-readings that could not be taken are kept in
//! the schema as [`Reading::Unavailable`] instead of being dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One sub-reading of a sample: either a value or an explicit marker that
/// the host could not provide it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reading<T> {
    Available { value: T },
    Unavailable { reason: String },
}

impl<T> Reading<T> {
    pub fn available(value: T) -> Self {
        Reading::Available { value }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Reading::Unavailable {
            reason: reason.into(),
        }
    }

    /// The value, if the reading was taken.
    pub fn value(&self) -> Option<&T> {
        match self {
            Reading::Available { value } => Some(value),
            Reading::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Reading::Available { .. })
    }
}

/// Device facts captured once per session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub cpu_cores: Option<u32>,
    pub device_memory_gb: Option<f64>,
    pub platform: Option<String>,
    pub os_version: Option<String>,
    pub hostname: Option<String>,
}

/// Display facts captured once per session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub pixel_ratio: Option<f64>,
    pub color_depth: Option<u32>,
}

/// Browser / runtime facts captured once per session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowserInfo {
    pub user_agent: Option<String>,
    pub language: Option<String>,
    pub timezone: Option<String>,
}

/// Session-invariant host facts. Immutable once captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticSnapshot {
    /// When the snapshot was captured
    pub captured_at: DateTime<Utc>,
    pub device: DeviceInfo,
    pub display: DisplayInfo,
    pub browser: BrowserInfo,
    /// Capability name -> supported. Absent means the probe did not check.
    pub capabilities: BTreeMap<String, bool>,
}

impl Default for StaticSnapshot {
    fn default() -> Self {
        Self {
            captured_at: Utc::now(),
            device: DeviceInfo::default(),
            display: DisplayInfo::default(),
            browser: BrowserInfo::default(),
            capabilities: BTreeMap::new(),
        }
    }
}

impl StaticSnapshot {
    /// Number of capabilities the probe reported as supported.
    pub fn supported_capabilities(&self) -> usize {
        self.capabilities.values().filter(|&&s| s).count()
    }
}

/// Connectivity state and quality for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkReading {
    pub online: bool,
    /// Physical link type, e.g. "wifi", "ethernet", "cellular"
    pub connection_type: Option<String>,
    /// Effective quality bucket, e.g. "4g", "3g"
    pub effective_type: Option<String>,
    /// Round-trip time estimate in milliseconds
    pub rtt_ms: Option<f64>,
    /// Downlink estimate in Mbit/s
    pub downlink_mbps: Option<f64>,
    pub save_data: Option<bool>,
}

/// Memory usage for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryReading {
    pub used_bytes: u64,
    pub total_bytes: u64,
    /// Hard ceiling, when the host exposes one
    pub limit_bytes: Option<u64>,
}

impl MemoryReading {
    /// Used fraction of the limit (or of the total when no limit is known).
    pub fn usage_ratio(&self) -> Option<f64> {
        let denominator = self.limit_bytes.unwrap_or(self.total_bytes);
        if denominator == 0 {
            return None;
        }
        Some((self.used_bytes as f64 / denominator as f64).clamp(0.0, 1.0))
    }
}

/// Coarse visibility / focus state for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityReading {
    pub visible: bool,
    pub focused: bool,
    /// Seconds since the last user input, when known
    pub idle_secs: Option<u64>,
}

/// Battery state for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatteryReading {
    /// Charge level in 0.0..=1.0
    pub level: f64,
    pub charging: bool,
}

/// One timer tick's reading of the time-varying host signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousSample {
    /// Position within the session, starting at 0
    pub index: u64,
    /// Offset from the session start in milliseconds
    pub elapsed_ms: u64,
    pub captured_at: DateTime<Utc>,
    pub network: Reading<NetworkReading>,
    pub memory: Reading<MemoryReading>,
    pub activity: Reading<ActivityReading>,
    pub battery: Reading<BatteryReading>,
}

impl ContinuousSample {
    /// Count of sub-readings that were unavailable on this tick.
    pub fn unavailable_count(&self) -> usize {
        [
            self.network.is_available(),
            self.memory.is_available(),
            self.activity.is_available(),
            self.battery.is_available(),
        ]
        .iter()
        .filter(|&&available| !available)
        .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_serializes_with_status_tag() {
        let reading: Reading<BatteryReading> = Reading::unavailable("permission denied");
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["reason"], "permission denied");

        let reading = Reading::available(BatteryReading {
            level: 0.5,
            charging: true,
        });
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["status"], "available");
        assert_eq!(json["value"]["charging"], true);
    }

    #[test]
    fn test_memory_usage_ratio_prefers_limit() {
        let memory = MemoryReading {
            used_bytes: 50,
            total_bytes: 1000,
            limit_bytes: Some(100),
        };
        assert_eq!(memory.usage_ratio(), Some(0.5));

        let memory = MemoryReading {
            used_bytes: 50,
            total_bytes: 0,
            limit_bytes: None,
        };
        assert_eq!(memory.usage_ratio(), None);
    }

    #[test]
    fn test_supported_capabilities() {
        let mut snapshot = StaticSnapshot::default();
        snapshot.capabilities.insert("webgl".into(), true);
        snapshot.capabilities.insert("bluetooth".into(), false);
        assert_eq!(snapshot.supported_capabilities(), 1);
    }
}
