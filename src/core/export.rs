//! Flat, fixed-column export of a session.
//!
//! The schema is a single ordered list of `(name, extractor)` columns. Every
//! row, static or continuous, is produced by running every extractor, so all
//! rows share the same columns in the same order. Values an extractor cannot
//! fill for a row kind come out as `None` (an empty field in text form).

use crate::collector::types::{ContinuousSample, Reading, StaticSnapshot};
use crate::core::scorer::DerivedTelemetry;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Version of the column list below. Bump when columns change.
pub const SCHEMA_VERSION: &str = "1.0";

/// Field delimiter used when none is configured.
pub const DEFAULT_DELIMITER: char = ',';

/// What a row is built from.
#[derive(Debug, Clone, Copy)]
pub enum RowSource<'a> {
    Static(&'a StaticSnapshot),
    Continuous {
        sample: &'a ContinuousSample,
        /// Latest derived telemetry available when the sample was taken
        derived: Option<&'a DerivedTelemetry>,
    },
}

/// Everything an extractor may read.
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    pub session_id: &'a str,
    pub source: RowSource<'a>,
}

type Extractor = fn(&RowContext<'_>) -> Option<String>;

/// One declared column.
pub struct Column {
    pub name: &'static str,
    extract: Extractor,
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column").field("name", &self.name).finish()
    }
}

fn num(value: f64) -> String {
    let rounded = (value * 10_000.0).round() / 10_000.0;
    rounded.to_string()
}

fn from_static<T: ToString>(
    row: &RowContext<'_>,
    f: impl FnOnce(&StaticSnapshot) -> Option<T>,
) -> Option<String> {
    match row.source {
        RowSource::Static(snapshot) => f(snapshot).map(|v| v.to_string()),
        RowSource::Continuous { .. } => None,
    }
}

fn from_sample(
    row: &RowContext<'_>,
    f: impl FnOnce(&ContinuousSample) -> Option<String>,
) -> Option<String> {
    match row.source {
        RowSource::Continuous { sample, .. } => f(sample),
        RowSource::Static(_) => None,
    }
}

fn from_reading<T>(
    row: &RowContext<'_>,
    slot: impl FnOnce(&ContinuousSample) -> &Reading<T>,
    f: impl FnOnce(&T) -> Option<String>,
) -> Option<String> {
    from_sample(row, |sample| slot(sample).value().and_then(f))
}

fn from_derived(
    row: &RowContext<'_>,
    f: impl FnOnce(&DerivedTelemetry) -> Option<String>,
) -> Option<String> {
    match row.source {
        RowSource::Continuous {
            derived: Some(derived),
            ..
        } => f(derived),
        _ => None,
    }
}

/// The column contract. Order here is the order of every emitted row.
pub static COLUMNS: &[Column] = &[
    Column {
        name: "schema_version",
        extract: |_| Some(SCHEMA_VERSION.to_string()),
    },
    Column {
        name: "session_id",
        extract: |row| Some(row.session_id.to_string()),
    },
    Column {
        name: "record_type",
        extract: |row| {
            Some(
                match row.source {
                    RowSource::Static(_) => "static",
                    RowSource::Continuous { .. } => "continuous",
                }
                .to_string(),
            )
        },
    },
    Column {
        name: "sample_index",
        extract: |row| from_sample(row, |s| Some(s.index.to_string())),
    },
    Column {
        name: "elapsed_ms",
        extract: |row| from_sample(row, |s| Some(s.elapsed_ms.to_string())),
    },
    Column {
        name: "captured_at",
        extract: |row| match row.source {
            RowSource::Static(snapshot) => Some(snapshot.captured_at.to_rfc3339()),
            RowSource::Continuous { sample, .. } => Some(sample.captured_at.to_rfc3339()),
        },
    },
    // Static snapshot
    Column {
        name: "device_cpu_cores",
        extract: |row| from_static(row, |s| s.device.cpu_cores),
    },
    Column {
        name: "device_memory_gb",
        extract: |row| from_static(row, |s| s.device.device_memory_gb.map(num)),
    },
    Column {
        name: "device_platform",
        extract: |row| from_static(row, |s| s.device.platform.clone()),
    },
    Column {
        name: "device_os_version",
        extract: |row| from_static(row, |s| s.device.os_version.clone()),
    },
    Column {
        name: "device_hostname",
        extract: |row| from_static(row, |s| s.device.hostname.clone()),
    },
    Column {
        name: "display_width",
        extract: |row| from_static(row, |s| s.display.width),
    },
    Column {
        name: "display_height",
        extract: |row| from_static(row, |s| s.display.height),
    },
    Column {
        name: "display_pixel_ratio",
        extract: |row| from_static(row, |s| s.display.pixel_ratio.map(num)),
    },
    Column {
        name: "display_color_depth",
        extract: |row| from_static(row, |s| s.display.color_depth),
    },
    Column {
        name: "browser_user_agent",
        extract: |row| from_static(row, |s| s.browser.user_agent.clone()),
    },
    Column {
        name: "browser_language",
        extract: |row| from_static(row, |s| s.browser.language.clone()),
    },
    Column {
        name: "browser_timezone",
        extract: |row| from_static(row, |s| s.browser.timezone.clone()),
    },
    Column {
        name: "supported_capabilities",
        extract: |row| {
            from_static(row, |s| {
                let supported: Vec<&str> = s
                    .capabilities
                    .iter()
                    .filter(|(_, supported)| **supported)
                    .map(|(name, _)| name.as_str())
                    .collect();
                Some(supported.join(";"))
            })
        },
    },
    // Continuous sample
    Column {
        name: "unavailable_signals",
        extract: |row| {
            from_sample(row, |s| {
                let missing: Vec<&str> = [
                    ("network", s.network.is_available()),
                    ("memory", s.memory.is_available()),
                    ("activity", s.activity.is_available()),
                    ("battery", s.battery.is_available()),
                ]
                .into_iter()
                .filter(|(_, available)| !available)
                .map(|(name, _)| name)
                .collect();
                Some(missing.join(";"))
            })
        },
    },
    Column {
        name: "network_online",
        extract: |row| from_reading(row, |s| &s.network, |n| Some(n.online.to_string())),
    },
    Column {
        name: "network_connection_type",
        extract: |row| from_reading(row, |s| &s.network, |n| n.connection_type.clone()),
    },
    Column {
        name: "network_effective_type",
        extract: |row| from_reading(row, |s| &s.network, |n| n.effective_type.clone()),
    },
    Column {
        name: "network_rtt_ms",
        extract: |row| from_reading(row, |s| &s.network, |n| n.rtt_ms.map(num)),
    },
    Column {
        name: "network_downlink_mbps",
        extract: |row| from_reading(row, |s| &s.network, |n| n.downlink_mbps.map(num)),
    },
    Column {
        name: "network_save_data",
        extract: |row| from_reading(row, |s| &s.network, |n| n.save_data.map(|v| v.to_string())),
    },
    Column {
        name: "memory_used_bytes",
        extract: |row| from_reading(row, |s| &s.memory, |m| Some(m.used_bytes.to_string())),
    },
    Column {
        name: "memory_total_bytes",
        extract: |row| from_reading(row, |s| &s.memory, |m| Some(m.total_bytes.to_string())),
    },
    Column {
        name: "memory_limit_bytes",
        extract: |row| {
            from_reading(row, |s| &s.memory, |m| {
                m.limit_bytes.map(|v| v.to_string())
            })
        },
    },
    Column {
        name: "activity_visible",
        extract: |row| from_reading(row, |s| &s.activity, |a| Some(a.visible.to_string())),
    },
    Column {
        name: "activity_focused",
        extract: |row| from_reading(row, |s| &s.activity, |a| Some(a.focused.to_string())),
    },
    Column {
        name: "activity_idle_secs",
        extract: |row| {
            from_reading(row, |s| &s.activity, |a| {
                a.idle_secs.map(|v| v.to_string())
            })
        },
    },
    Column {
        name: "battery_level",
        extract: |row| from_reading(row, |s| &s.battery, |b| Some(num(b.level))),
    },
    Column {
        name: "battery_charging",
        extract: |row| from_reading(row, |s| &s.battery, |b| Some(b.charging.to_string())),
    },
    // Derived telemetry
    Column {
        name: "derived_sample_count",
        extract: |row| from_derived(row, |d| Some(d.sample_count.to_string())),
    },
    Column {
        name: "presence_ratio",
        extract: |row| from_derived(row, |d| d.presence_ratio.map(num)),
    },
    Column {
        name: "presence_score",
        extract: |row| from_derived(row, |d| d.presence_score.map(num)),
    },
    Column {
        name: "focus_ratio",
        extract: |row| from_derived(row, |d| d.focus_ratio.map(num)),
    },
    Column {
        name: "engagement_level",
        extract: |row| {
            from_derived(row, |d| {
                d.engagement_level.map(|v| v.as_str().to_string())
            })
        },
    },
    Column {
        name: "network_reliability_score",
        extract: |row| from_derived(row, |d| d.network_reliability_score.map(num)),
    },
    Column {
        name: "network_stability_score",
        extract: |row| from_derived(row, |d| d.network_stability_score.map(num)),
    },
    Column {
        name: "network_type_changes",
        extract: |row| from_derived(row, |d| Some(d.network_type_changes.to_string())),
    },
    Column {
        name: "mean_rtt_ms",
        extract: |row| from_derived(row, |d| d.mean_rtt_ms.map(num)),
    },
    Column {
        name: "connection_quality",
        extract: |row| {
            from_derived(row, |d| {
                d.connection_quality.map(|v| v.as_str().to_string())
            })
        },
    },
    Column {
        name: "memory_pressure_score",
        extract: |row| from_derived(row, |d| d.memory_pressure_score.map(num)),
    },
    Column {
        name: "memory_trend",
        extract: |row| from_derived(row, |d| d.memory_trend.map(|v| v.as_str().to_string())),
    },
    Column {
        name: "battery_drain_per_hour",
        extract: |row| from_derived(row, |d| d.battery_drain_per_hour.map(num)),
    },
    Column {
        name: "device_class",
        extract: |row| from_derived(row, |d| d.device_class.map(|v| v.as_str().to_string())),
    },
    Column {
        name: "capability_coverage_score",
        extract: |row| from_derived(row, |d| d.capability_coverage_score.map(num)),
    },
    Column {
        name: "composite_risk_score",
        extract: |row| from_derived(row, |d| d.composite_risk_score.map(|v| v.to_string())),
    },
    Column {
        name: "risk_level",
        extract: |row| from_derived(row, |d| d.risk_level.map(|v| v.as_str().to_string())),
    },
];

/// Column names in contract order.
pub fn header() -> Vec<&'static str> {
    COLUMNS.iter().map(|c| c.name).collect()
}

/// One named value of a flat record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatField {
    pub name: &'static str,
    pub value: Option<String>,
}

/// One exported row: a value (possibly empty) for every declared column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatRecord {
    fields: Vec<FlatField>,
}

impl FlatRecord {
    pub fn fields(&self) -> &[FlatField] {
        &self.fields
    }

    /// Value of the named column. `None` both for unknown columns and for
    /// empty values.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| f.value.as_deref())
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }
}

impl Serialize for FlatRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for field in &self.fields {
            map.serialize_entry(field.name, &field.value)?;
        }
        map.end()
    }
}

/// Build a row by running every column extractor.
pub fn flatten(session_id: &str, source: RowSource<'_>) -> FlatRecord {
    let row = RowContext { session_id, source };
    FlatRecord {
        fields: COLUMNS
            .iter()
            .map(|column| FlatField {
                name: column.name,
                value: (column.extract)(&row),
            })
            .collect(),
    }
}

/// Quote a field when it contains the delimiter, a quote, or a line break;
/// quotes inside a quoted field are doubled.
pub fn escape_field(value: &str, delimiter: char) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c == delimiter || c == '"' || c == '\n' || c == '\r');
    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render records as delimited text: a header line, then one line per
/// record, each terminated by `\n`.
pub fn to_delimited_text(records: &[FlatRecord], delimiter: char) -> String {
    let separator = delimiter.to_string();
    let mut out = String::new();

    let header: Vec<String> = COLUMNS
        .iter()
        .map(|c| escape_field(c.name, delimiter))
        .collect();
    out.push_str(&header.join(&separator));
    out.push('\n');

    for record in records {
        let line: Vec<String> = COLUMNS
            .iter()
            .map(|column| {
                record
                    .fields
                    .iter()
                    .find(|f| f.name == column.name)
                    .and_then(|f| f.value.as_deref())
                    .map(|v| escape_field(v, delimiter))
                    .unwrap_or_default()
            })
            .collect();
        out.push_str(&line.join(&separator));
        out.push('\n');
    }

    out
}
