//! Native host provider built on `sysinfo`.
//!
//! Outside a browser there is no page visibility or battery API, so those
//! categories report `NotSupported` and show up as unavailable readings.

use crate::collector::provider::{
    ActivitySource, BatterySource, MemorySource, NetworkSource, ProbeError,
    SignalError, SignalSources, StaticProbe,
};
use crate::collector::types::{
    ActivityReading, BatteryReading, BrowserInfo, DeviceInfo, DisplayInfo, MemoryReading,
    NetworkReading, StaticSnapshot,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Mutex;
use sysinfo::{Networks, System};

/// Captures device facts from the operating system.
#[derive(Debug, Default)]
pub struct HostProbe;

#[async_trait]
impl StaticProbe for HostProbe {
    async fn capture(&self) -> Result<StaticSnapshot, ProbeError> {
        tokio::task::spawn_blocking(capture_host_snapshot)
            .await
            .map_err(|e| ProbeError::Failed(e.to_string()))
    }
}

fn capture_host_snapshot() -> StaticSnapshot {
    let mut sys = System::new();
    sys.refresh_cpu();
    sys.refresh_memory();

    let cpu_cores = match sys.cpus().len() {
        0 => None,
        n => Some(n as u32),
    };
    let device_memory_gb = match sys.total_memory() {
        0 => None,
        bytes => Some(bytes as f64 / (1024.0 * 1024.0 * 1024.0)),
    };

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .or_else(System::host_name);

    let mut capabilities = BTreeMap::new();
    capabilities.insert("memory_stats".to_string(), device_memory_gb.is_some());
    capabilities.insert("network_interfaces".to_string(), true);
    capabilities.insert("page_visibility".to_string(), false);
    capabilities.insert("battery_status".to_string(), false);

    StaticSnapshot {
        captured_at: Utc::now(),
        device: DeviceInfo {
            cpu_cores,
            device_memory_gb,
            platform: System::name().or_else(|| Some(std::env::consts::OS.to_string())),
            os_version: System::os_version(),
            hostname,
        },
        display: DisplayInfo::default(),
        browser: BrowserInfo {
            user_agent: Some(format!("{}/{}", crate::PRODUCER_NAME, crate::VERSION)),
            language: std::env::var("LANG").ok(),
            timezone: std::env::var("TZ").ok(),
        },
        capabilities,
    }
}

/// Reports whether any non-loopback interface is carrying traffic.
pub struct HostNetworkSource {
    networks: Mutex<Networks>,
}

impl HostNetworkSource {
    pub fn new() -> Self {
        Self {
            networks: Mutex::new(Networks::new_with_refreshed_list()),
        }
    }
}

impl Default for HostNetworkSource {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkSource for HostNetworkSource {
    fn read(&self) -> Result<NetworkReading, SignalError> {
        let mut networks = self
            .networks
            .lock()
            .map_err(|_| SignalError::ReadFailed("network state lock poisoned".into()))?;
        networks.refresh();

        let mut active: Vec<&str> = networks
            .iter()
            .filter(|(name, data)| !is_loopback(name) && data.total_received() > 0)
            .map(|(name, _)| name.as_str())
            .collect();
        active.sort_unstable();

        Ok(NetworkReading {
            online: !active.is_empty(),
            connection_type: active.first().and_then(|name| classify_interface(name)),
            effective_type: None,
            rtt_ms: None,
            downlink_mbps: None,
            save_data: None,
        })
    }
}

fn is_loopback(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0") || name.eq_ignore_ascii_case("loopback")
}

/// Guess the link type from conventional interface names.
/// BSD-style `en<N>` may be either wired or wireless, so it stays unknown.
fn classify_interface(name: &str) -> Option<String> {
    const WIRED_PREFIXES: [&str; 5] = ["eth", "enp", "eno", "ens", "enx"];
    let kind = if name.starts_with("wl") || name.starts_with("wifi") {
        "wifi"
    } else if WIRED_PREFIXES.iter().any(|p| name.starts_with(p)) {
        "ethernet"
    } else if name.starts_with("ww") || name.starts_with("rmnet") {
        "cellular"
    } else {
        return None;
    };
    Some(kind.to_string())
}

/// System memory usage.
pub struct HostMemorySource {
    system: Mutex<System>,
}

impl HostMemorySource {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for HostMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource for HostMemorySource {
    fn read(&self) -> Result<MemoryReading, SignalError> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| SignalError::ReadFailed("memory state lock poisoned".into()))?;
        system.refresh_memory();

        let total_bytes = system.total_memory();
        if total_bytes == 0 {
            return Err(SignalError::NotSupported);
        }
        Ok(MemoryReading {
            used_bytes: system.used_memory(),
            total_bytes,
            limit_bytes: None,
        })
    }
}

/// Page visibility has no native equivalent.
#[derive(Debug, Default)]
pub struct HostActivitySource;

impl ActivitySource for HostActivitySource {
    fn read(&self) -> Result<ActivityReading, SignalError> {
        Err(SignalError::NotSupported)
    }
}

/// Battery status is not exposed by `sysinfo`.
#[derive(Debug, Default)]
pub struct HostBatterySource;

impl BatterySource for HostBatterySource {
    fn read(&self) -> Result<BatteryReading, SignalError> {
        Err(SignalError::NotSupported)
    }
}

/// Host-backed sources for every category.
pub fn host_sources() -> SignalSources {
    SignalSources {
        network: Box::new(HostNetworkSource::new()),
        memory: Box::new(HostMemorySource::new()),
        activity: Box::new(HostActivitySource),
        battery: Box::new(HostBatterySource),
    }
}
