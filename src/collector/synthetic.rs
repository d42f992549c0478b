//! Deterministic synthetic signal providers.
//!
//! These stand in for a real host: every value is a pure function of the
//! read count, failures and panics can be scripted per category, and each
//! source counts how often it was read.

use crate::collector::provider::{
    ActivitySource, BatterySource, MemorySource, NetworkSource, ProbeError, SignalError,
    SignalSources, StaticProbe,
};
use crate::collector::types::{
    ActivityReading, BatteryReading, BrowserInfo, DeviceInfo, DisplayInfo, MemoryReading,
    NetworkReading, StaticSnapshot,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted outcome of a read.
#[derive(Debug, Clone)]
pub enum Scripted<T> {
    Value(T),
    Fail(SignalError),
    /// Panic inside the provider, as a misbehaving host binding would.
    Panic(&'static str),
}

type Generator<T> = Box<dyn Fn(u64) -> Scripted<T> + Send + Sync>;

/// A source whose n-th read returns `generate(n)`.
pub struct SyntheticSource<T> {
    generate: Generator<T>,
    calls: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> SyntheticSource<T> {
    pub fn from_fn(generate: impl Fn(u64) -> Scripted<T> + Send + Sync + 'static) -> Self {
        Self {
            generate: Box::new(generate),
            calls: AtomicU64::new(0),
        }
    }

    /// Always returns `value`.
    pub fn constant(value: T) -> Self {
        Self::from_fn(move |_| Scripted::Value(value.clone()))
    }

    /// Plays `steps` in order, then keeps repeating the last one.
    /// An empty script reports the signal as not supported.
    pub fn script(steps: Vec<Scripted<T>>) -> Self {
        Self::from_fn(move |n| {
            let last = steps.len().saturating_sub(1);
            match steps.get((n as usize).min(last)) {
                Some(step) => step.clone(),
                None => Scripted::Fail(SignalError::NotSupported),
            }
        })
    }

    /// Same value on every read except those whose index is in `failing`.
    pub fn failing_on(value: T, failing: Vec<u64>, error: SignalError) -> Self {
        Self::from_fn(move |n| {
            if failing.contains(&n) {
                Scripted::Fail(error.clone())
            } else {
                Scripted::Value(value.clone())
            }
        })
    }

    /// How many times the source has been read.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<T, SignalError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        match (self.generate)(n) {
            Scripted::Value(value) => Ok(value),
            Scripted::Fail(error) => Err(error),
            Scripted::Panic(message) => panic!("{message}"),
        }
    }
}

impl NetworkSource for SyntheticSource<NetworkReading> {
    fn read(&self) -> Result<NetworkReading, SignalError> {
        self.next()
    }
}

impl MemorySource for SyntheticSource<MemoryReading> {
    fn read(&self) -> Result<MemoryReading, SignalError> {
        self.next()
    }
}

impl ActivitySource for SyntheticSource<ActivityReading> {
    fn read(&self) -> Result<ActivityReading, SignalError> {
        self.next()
    }
}

impl BatterySource for SyntheticSource<BatteryReading> {
    fn read(&self) -> Result<BatteryReading, SignalError> {
        self.next()
    }
}

/// A full set of synthetic sources. Cloning shares the underlying sources,
/// so a test can keep a handle and inspect call counts after handing the
/// sources to an agent.
#[derive(Clone)]
pub struct SyntheticSignals {
    pub network: Arc<SyntheticSource<NetworkReading>>,
    pub memory: Arc<SyntheticSource<MemoryReading>>,
    pub activity: Arc<SyntheticSource<ActivityReading>>,
    pub battery: Arc<SyntheticSource<BatteryReading>>,
}

impl SyntheticSignals {
    /// Identical readings on every tick.
    pub fn steady() -> Self {
        Self {
            network: Arc::new(SyntheticSource::constant(steady_network())),
            memory: Arc::new(SyntheticSource::constant(MemoryReading {
                used_bytes: 512 * 1024 * 1024,
                total_bytes: 8 * 1024 * 1024 * 1024,
                limit_bytes: Some(2 * 1024 * 1024 * 1024),
            })),
            activity: Arc::new(SyntheticSource::constant(ActivityReading {
                visible: true,
                focused: true,
                idle_secs: Some(0),
            })),
            battery: Arc::new(SyntheticSource::constant(BatteryReading {
                level: 0.8,
                charging: false,
            })),
        }
    }

    /// Readings that drift deterministically with the tick count; used for
    /// demo runs where a flat line would make the scores uninteresting.
    pub fn wandering() -> Self {
        Self {
            network: Arc::new(SyntheticSource::from_fn(|n| {
                Scripted::Value(NetworkReading {
                    online: n % 17 != 16,
                    connection_type: Some(if n % 40 < 30 { "wifi" } else { "cellular" }.into()),
                    effective_type: Some("4g".into()),
                    rtt_ms: Some(40.0 + ((n * 37) % 60) as f64),
                    downlink_mbps: Some(8.0 + ((n * 13) % 7) as f64),
                    save_data: Some(false),
                })
            })),
            memory: Arc::new(SyntheticSource::from_fn(|n| {
                let mib = 1024 * 1024;
                Scripted::Value(MemoryReading {
                    used_bytes: (400 + (n % 50) * 8) * mib,
                    total_bytes: 8192 * mib,
                    limit_bytes: Some(2048 * mib),
                })
            })),
            activity: Arc::new(SyntheticSource::from_fn(|n| {
                let visible = n % 7 != 6;
                Scripted::Value(ActivityReading {
                    visible,
                    focused: visible && n % 5 != 4,
                    idle_secs: Some((n % 9) * 3),
                })
            })),
            battery: Arc::new(SyntheticSource::from_fn(|n| {
                Scripted::Value(BatteryReading {
                    level: (0.95 - n as f64 * 0.002).max(0.05),
                    charging: false,
                })
            })),
        }
    }

    pub fn with_network(mut self, source: SyntheticSource<NetworkReading>) -> Self {
        self.network = Arc::new(source);
        self
    }

    pub fn with_memory(mut self, source: SyntheticSource<MemoryReading>) -> Self {
        self.memory = Arc::new(source);
        self
    }

    pub fn with_activity(mut self, source: SyntheticSource<ActivityReading>) -> Self {
        self.activity = Arc::new(source);
        self
    }

    pub fn with_battery(mut self, source: SyntheticSource<BatteryReading>) -> Self {
        self.battery = Arc::new(source);
        self
    }

    /// Box the sources for an agent, keeping shared ownership.
    pub fn into_sources(self) -> SignalSources {
        SignalSources {
            network: Box::new(self.network),
            memory: Box::new(self.memory),
            activity: Box::new(self.activity),
            battery: Box::new(self.battery),
        }
    }
}

fn steady_network() -> NetworkReading {
    NetworkReading {
        online: true,
        connection_type: Some("wifi".into()),
        effective_type: Some("4g".into()),
        rtt_ms: Some(50.0),
        downlink_mbps: Some(10.0),
        save_data: Some(false),
    }
}

/// A static probe returning a fixed snapshot.
pub struct SyntheticProbe {
    snapshot: StaticSnapshot,
    failures_remaining: AtomicU64,
    delay: Option<Duration>,
    calls: AtomicU64,
}

impl SyntheticProbe {
    pub fn new(snapshot: StaticSnapshot) -> Self {
        Self {
            snapshot,
            failures_remaining: AtomicU64::new(0),
            delay: None,
            calls: AtomicU64::new(0),
        }
    }

    /// A plausible mid-range laptop.
    pub fn laptop() -> Self {
        let mut capabilities = BTreeMap::new();
        for (name, supported) in [
            ("web_workers", true),
            ("webgl", true),
            ("service_worker", true),
            ("bluetooth", false),
            ("usb", false),
        ] {
            capabilities.insert(name.to_string(), supported);
        }

        Self::new(StaticSnapshot {
            captured_at: Utc::now(),
            device: DeviceInfo {
                cpu_cores: Some(8),
                device_memory_gb: Some(8.0),
                platform: Some("synthetic".into()),
                os_version: Some("1.0".into()),
                hostname: Some("synthetic-host".into()),
            },
            display: DisplayInfo {
                width: Some(1920),
                height: Some(1080),
                pixel_ratio: Some(2.0),
                color_depth: Some(24),
            },
            browser: BrowserInfo {
                user_agent: Some("SyntheticAgent/1.0".into()),
                language: Some("en-US".into()),
                timezone: Some("UTC".into()),
            },
            capabilities,
        })
    }

    /// Fail the first `count` captures.
    pub fn failing_first(self, count: u64) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Suspend each capture for `delay` before resolving.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many captures were attempted.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StaticProbe for SyntheticProbe {
    async fn capture(&self) -> Result<StaticSnapshot, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ProbeError::Failed("synthetic capture failure".into()));
        }

        Ok(self.snapshot.clone())
    }
}
