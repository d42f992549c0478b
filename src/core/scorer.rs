//! Derived telemetry inferred from the sample history.
//!
//! Every value here is a heuristic computed from the ordered samples and the
//! static snapshot. [`infer`] is pure and never fails: when there is not
//! enough data for a value it is `None`, and every score that is present is
//! clamped to its declared range.

use crate::collector::types::{ContinuousSample, NetworkReading, StaticSnapshot};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Composite risk score at or above which the risk level is Low.
pub const RISK_LOW_MIN: u8 = 80;
/// Composite risk score at or above which the risk level is Medium.
pub const RISK_MEDIUM_MIN: u8 = 60;
/// Composite risk score at or above which the risk level is High.
pub const RISK_HIGH_MIN: u8 = 40;

/// Composite weights. They sum to 1.
pub const PRESENCE_WEIGHT: f64 = 0.4;
pub const RELIABILITY_WEIGHT: f64 = 0.3;
pub const STABILITY_WEIGHT: f64 = 0.3;

/// Reliability points lost per network type change.
pub const NETWORK_CHANGE_PENALTY: f64 = 5.0;
/// Maximum reliability points lost to network type changes.
pub const NETWORK_CHANGE_PENALTY_CAP: f64 = 20.0;

/// Presence ratios at or above these map to High / Medium engagement.
pub const ENGAGEMENT_HIGH_MIN: f64 = 0.8;
pub const ENGAGEMENT_MEDIUM_MIN: f64 = 0.5;

/// Mean RTT upper bounds (exclusive) for Excellent / Good / Fair.
pub const RTT_EXCELLENT_MAX_MS: f64 = 50.0;
pub const RTT_GOOD_MAX_MS: f64 = 150.0;
pub const RTT_FAIR_MAX_MS: f64 = 300.0;

/// Change in memory pressure (points) that counts as a trend.
pub const MEMORY_TREND_THRESHOLD: f64 = 5.0;

/// Minimum samples for any value that needs a spread or a slope.
const MIN_SERIES_LEN: usize = 2;

/// Categorical risk derived from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Map a composite score onto the fixed breakpoints.
    pub fn from_score(score: u8) -> Self {
        if score >= RISK_LOW_MIN {
            RiskLevel::Low
        } else if score >= RISK_MEDIUM_MIN {
            RiskLevel::Medium
        } else if score >= RISK_HIGH_MIN {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngagementLevel {
    High,
    Medium,
    Low,
}

impl EngagementLevel {
    pub fn from_presence(ratio: f64) -> Self {
        if ratio >= ENGAGEMENT_HIGH_MIN {
            EngagementLevel::High
        } else if ratio >= ENGAGEMENT_MEDIUM_MIN {
            EngagementLevel::Medium
        } else {
            EngagementLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementLevel::High => "High",
            EngagementLevel::Medium => "Medium",
            EngagementLevel::Low => "Low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl ConnectionQuality {
    pub fn from_rtt(rtt_ms: f64) -> Self {
        if rtt_ms < RTT_EXCELLENT_MAX_MS {
            ConnectionQuality::Excellent
        } else if rtt_ms < RTT_GOOD_MAX_MS {
            ConnectionQuality::Good
        } else if rtt_ms < RTT_FAIR_MAX_MS {
            ConnectionQuality::Fair
        } else {
            ConnectionQuality::Poor
        }
    }

    /// Fallback when only the effective connection type is known.
    pub fn from_effective_type(effective_type: &str) -> Option<Self> {
        match effective_type {
            "4g" => Some(ConnectionQuality::Good),
            "3g" => Some(ConnectionQuality::Fair),
            "2g" | "slow-2g" => Some(ConnectionQuality::Poor),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionQuality::Excellent => "Excellent",
            ConnectionQuality::Good => "Good",
            ConnectionQuality::Fair => "Fair",
            ConnectionQuality::Poor => "Poor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Rising,
    Stable,
    Falling,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Rising => "Rising",
            Trend::Stable => "Stable",
            Trend::Falling => "Falling",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    HighEnd,
    MidRange,
    LowEnd,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::HighEnd => "HighEnd",
            DeviceClass::MidRange => "MidRange",
            DeviceClass::LowEnd => "LowEnd",
        }
    }
}

/// The fixed-shape output of [`infer`]. Every field is always present;
/// `None` means there was not enough data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedTelemetry {
    pub sample_count: usize,
    /// Fraction of samples reported visible (0-1)
    pub presence_ratio: Option<f64>,
    /// Presence ratio as a 0-100 score
    pub presence_score: Option<f64>,
    /// Fraction of activity-bearing samples reported focused (0-1)
    pub focus_ratio: Option<f64>,
    pub engagement_level: Option<EngagementLevel>,
    /// 0-100
    pub network_reliability_score: Option<f64>,
    /// 0-100
    pub network_stability_score: Option<f64>,
    pub network_type_changes: u32,
    pub mean_rtt_ms: Option<f64>,
    pub connection_quality: Option<ConnectionQuality>,
    /// 0-100
    pub memory_pressure_score: Option<f64>,
    pub memory_trend: Option<Trend>,
    /// Percentage points of charge lost per hour (0-100)
    pub battery_drain_per_hour: Option<f64>,
    pub device_class: Option<DeviceClass>,
    /// 0-100
    pub capability_coverage_score: Option<f64>,
    /// 0-100
    pub composite_risk_score: Option<u8>,
    pub risk_level: Option<RiskLevel>,
}

impl DerivedTelemetry {
    /// The shape returned when nothing can be derived.
    pub fn insufficient() -> Self {
        Self {
            sample_count: 0,
            presence_ratio: None,
            presence_score: None,
            focus_ratio: None,
            engagement_level: None,
            network_reliability_score: None,
            network_stability_score: None,
            network_type_changes: 0,
            mean_rtt_ms: None,
            connection_quality: None,
            memory_pressure_score: None,
            memory_trend: None,
            battery_drain_per_hour: None,
            device_class: None,
            capability_coverage_score: None,
            composite_risk_score: None,
            risk_level: None,
        }
    }
}

impl Default for DerivedTelemetry {
    fn default() -> Self {
        Self::insufficient()
    }
}

/// Compute all derived telemetry from the static snapshot and the samples.
/// With no samples the result is [`DerivedTelemetry::insufficient`], even
/// when the snapshot alone would support some values.
pub fn infer(static_snapshot: &StaticSnapshot, samples: &[ContinuousSample]) -> DerivedTelemetry {
    if samples.is_empty() {
        return DerivedTelemetry::insufficient();
    }

    let presence_ratio = presence_ratio(samples);
    let presence_score = presence_ratio.map(|r| clamp_score(r * 100.0));

    let network_type_changes = network_type_changes(samples);
    let network_reliability_score = reliability_score(samples, network_type_changes);
    let network_stability_score = stability_score(&rtt_series(samples));

    let mean_rtt_ms = mean_rtt(samples);
    let connection_quality = mean_rtt_ms
        .map(ConnectionQuality::from_rtt)
        .or_else(|| effective_type_quality(samples));

    let composite_risk_score =
        composite_risk_score(presence_score, network_reliability_score, network_stability_score);

    DerivedTelemetry {
        sample_count: samples.len(),
        presence_ratio,
        presence_score,
        focus_ratio: focus_ratio(samples),
        engagement_level: presence_ratio.map(EngagementLevel::from_presence),
        network_reliability_score,
        network_stability_score,
        network_type_changes,
        mean_rtt_ms,
        connection_quality,
        memory_pressure_score: memory_pressure_score(samples),
        memory_trend: memory_trend(samples),
        battery_drain_per_hour: battery_drain_per_hour(samples),
        device_class: device_class(static_snapshot),
        capability_coverage_score: capability_coverage_score(static_snapshot),
        composite_risk_score,
        risk_level: composite_risk_score.map(RiskLevel::from_score),
    }
}

/// Fraction of all samples whose page was reported visible.
/// Samples without an activity reading count as not visible; with no
/// activity reading at all the ratio is unknown.
pub fn presence_ratio(samples: &[ContinuousSample]) -> Option<f64> {
    if !samples.iter().any(|s| s.activity.is_available()) {
        return None;
    }
    let visible = samples
        .iter()
        .filter(|s| s.activity.value().is_some_and(|a| a.visible))
        .count();
    Some(visible as f64 / samples.len() as f64)
}

fn focus_ratio(samples: &[ContinuousSample]) -> Option<f64> {
    let readings: Vec<bool> = samples
        .iter()
        .filter_map(|s| s.activity.value().map(|a| a.focused))
        .collect();
    if readings.is_empty() {
        return None;
    }
    let focused = readings.iter().filter(|&&f| f).count();
    Some(focused as f64 / readings.len() as f64)
}

fn network_readings(samples: &[ContinuousSample]) -> impl Iterator<Item = &NetworkReading> {
    samples.iter().filter_map(|s| s.network.value())
}

/// RTT values of the samples that carry one.
pub fn rtt_series(samples: &[ContinuousSample]) -> Vec<f64> {
    network_readings(samples)
        .filter_map(|n| n.rtt_ms)
        .filter(|rtt| rtt.is_finite() && *rtt >= 0.0)
        .collect()
}

/// `max(0, 100 - CV(rtt) * 100)` with CV the population coefficient of
/// variation. `None` for fewer than two values.
pub fn stability_score(rtts: &[f64]) -> Option<f64> {
    if rtts.len() < MIN_SERIES_LEN {
        return None;
    }
    let mean = rtts.mean();
    let std_dev = rtts.population_std_dev();
    if !mean.is_finite() || !std_dev.is_finite() {
        return None;
    }
    if mean == 0.0 {
        // All-zero RTTs are perfectly stable; any spread around a zero mean
        // has no defined coefficient of variation.
        return (std_dev == 0.0).then_some(100.0);
    }
    let cv = std_dev / mean;
    Some(clamp_score(100.0 - cv * 100.0))
}

/// Count consecutive network-bearing samples whose known connection type
/// differs.
pub fn network_type_changes(samples: &[ContinuousSample]) -> u32 {
    let types: Vec<&str> = network_readings(samples)
        .filter_map(|n| n.connection_type.as_deref())
        .collect();
    types.windows(2).filter(|pair| pair[0] != pair[1]).count() as u32
}

/// `online_fraction * 100` minus a capped penalty per network type change.
pub fn reliability_score(samples: &[ContinuousSample], type_changes: u32) -> Option<f64> {
    let (online, total) = network_readings(samples).fold((0usize, 0usize), |(on, n), r| {
        (on + usize::from(r.online), n + 1)
    });
    if total == 0 {
        return None;
    }
    let online_pct = online as f64 / total as f64 * 100.0;
    let penalty = (type_changes as f64 * NETWORK_CHANGE_PENALTY).min(NETWORK_CHANGE_PENALTY_CAP);
    Some(clamp_score(online_pct - penalty))
}

/// Weighted blend of the three component scores, rounded to the nearest
/// integer. `None` unless all three are known.
pub fn composite_risk_score(
    presence: Option<f64>,
    reliability: Option<f64>,
    stability: Option<f64>,
) -> Option<u8> {
    let (p, r, s) = (presence?, reliability?, stability?);
    let blended = PRESENCE_WEIGHT * p + RELIABILITY_WEIGHT * r + STABILITY_WEIGHT * s;
    if !blended.is_finite() {
        return None;
    }
    Some(clamp_score(blended.round()) as u8)
}

fn mean_rtt(samples: &[ContinuousSample]) -> Option<f64> {
    let rtts = rtt_series(samples);
    if rtts.is_empty() {
        return None;
    }
    Some(rtts.mean())
}

/// Quality from the most recent effective connection type.
fn effective_type_quality(samples: &[ContinuousSample]) -> Option<ConnectionQuality> {
    samples
        .iter()
        .rev()
        .filter_map(|s| s.network.value())
        .find_map(|n| n.effective_type.as_deref())
        .and_then(ConnectionQuality::from_effective_type)
}

fn memory_pressure_series(samples: &[ContinuousSample]) -> Vec<f64> {
    samples
        .iter()
        .filter_map(|s| s.memory.value())
        .filter_map(|m| m.usage_ratio())
        .map(|ratio| ratio * 100.0)
        .collect()
}

fn memory_pressure_score(samples: &[ContinuousSample]) -> Option<f64> {
    let series = memory_pressure_series(samples);
    if series.is_empty() {
        return None;
    }
    Some(clamp_score(series.mean()))
}

fn memory_trend(samples: &[ContinuousSample]) -> Option<Trend> {
    let series = memory_pressure_series(samples);
    if series.len() < MIN_SERIES_LEN {
        return None;
    }
    let delta = series[series.len() - 1] - series[0];
    Some(if delta > MEMORY_TREND_THRESHOLD {
        Trend::Rising
    } else if delta < -MEMORY_TREND_THRESHOLD {
        Trend::Falling
    } else {
        Trend::Stable
    })
}

/// Charge lost per hour between the first and last discharging samples.
fn battery_drain_per_hour(samples: &[ContinuousSample]) -> Option<f64> {
    let discharging: Vec<(u64, f64)> = samples
        .iter()
        .filter_map(|s| s.battery.value().map(|b| (s.elapsed_ms, b)))
        .filter(|(_, b)| !b.charging && b.level.is_finite())
        .map(|(elapsed, b)| (elapsed, b.level.clamp(0.0, 1.0)))
        .collect();
    if discharging.len() < MIN_SERIES_LEN {
        return None;
    }
    let (first_ms, first_level) = discharging[0];
    let (last_ms, last_level) = discharging[discharging.len() - 1];
    if last_ms <= first_ms {
        return None;
    }
    let hours = (last_ms - first_ms) as f64 / 3_600_000.0;
    let drained_points = (first_level - last_level) * 100.0;
    Some(clamp_score(drained_points / hours))
}

fn device_class(snapshot: &StaticSnapshot) -> Option<DeviceClass> {
    let cores = snapshot.device.cpu_cores;
    let memory = snapshot.device.device_memory_gb;
    if cores.is_none() && memory.is_none() {
        return None;
    }
    let cores = cores.unwrap_or(0);
    let memory = memory.unwrap_or(0.0);
    Some(if cores >= 8 && memory >= 8.0 {
        DeviceClass::HighEnd
    } else if cores >= 4 && memory >= 4.0 {
        DeviceClass::MidRange
    } else {
        DeviceClass::LowEnd
    })
}

fn capability_coverage_score(snapshot: &StaticSnapshot) -> Option<f64> {
    if snapshot.capabilities.is_empty() {
        return None;
    }
    let supported = snapshot.supported_capabilities();
    Some(clamp_score(
        supported as f64 / snapshot.capabilities.len() as f64 * 100.0,
    ))
}

fn clamp_score(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}
