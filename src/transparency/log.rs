//! Audit log of what the agent collected.
//!
//! Only counts are kept. No sample values pass through this module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Collection counters for the current session.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Number of continuous samples appended
    samples_collected: AtomicU64,
    /// Number of sample slots recorded as unavailable
    unavailable_readings: AtomicU64,
    /// Number of derived telemetry recomputations
    derived_recomputations: AtomicU64,
    /// Number of callbacks that returned an error or panicked
    callback_failures: AtomicU64,
    /// Number of flat rows handed out by the exporter
    rows_exported: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    pub fn new() -> Self {
        Self {
            samples_collected: AtomicU64::new(0),
            unavailable_readings: AtomicU64::new(0),
            derived_recomputations: AtomicU64::new(0),
            callback_failures: AtomicU64::new(0),
            rows_exported: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a transparency log that loads and saves its counters at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!(error = %e, "could not load previous transparency stats");
        }

        log
    }

    /// Record one appended sample and how many of its slots were unavailable.
    pub fn record_sample(&self, unavailable: usize) {
        self.samples_collected.fetch_add(1, Ordering::Relaxed);
        self.unavailable_readings
            .fetch_add(unavailable as u64, Ordering::Relaxed);
    }

    pub fn record_derived(&self) {
        self.derived_recomputations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback_failure(&self) {
        self.callback_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rows_exported(&self, count: u64) {
        self.rows_exported.fetch_add(count, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            samples_collected: self.samples_collected.load(Ordering::Relaxed),
            unavailable_readings: self.unavailable_readings.load(Ordering::Relaxed),
            derived_recomputations: self.derived_recomputations.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
            rows_exported: self.rows_exported.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Samples collected: {}\n\
             - Unavailable readings: {}\n\
             - Derived recomputations: {}\n\
             - Callback failures: {}\n\
             - Rows exported: {}\n\
             - Session duration: {} seconds\n\
             \n\
             Collection Scope:\n\
             - Device, display and capability facts captured once\n\
             - Network, memory, activity and battery state sampled periodically\n\
             - Samples are held in memory only",
            stats.samples_collected,
            stats.unavailable_readings,
            stats.derived_recomputations,
            stats.callback_failures,
            stats.rows_exported,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                samples_collected: stats.samples_collected,
                unavailable_readings: stats.unavailable_readings,
                derived_recomputations: stats.derived_recomputations,
                callback_failures: stats.callback_failures,
                rows_exported: stats.rows_exported,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.samples_collected
                    .store(persisted.samples_collected, Ordering::Relaxed);
                self.unavailable_readings
                    .store(persisted.unavailable_readings, Ordering::Relaxed);
                self.derived_recomputations
                    .store(persisted.derived_recomputations, Ordering::Relaxed);
                self.callback_failures
                    .store(persisted.callback_failures, Ordering::Relaxed);
                self.rows_exported
                    .store(persisted.rows_exported, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of transparency statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub samples_collected: u64,
    pub unavailable_readings: u64,
    pub derived_recomputations: u64,
    pub callback_failures: u64,
    pub rows_exported: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    samples_collected: u64,
    unavailable_readings: u64,
    derived_recomputations: u64,
    callback_failures: u64,
    rows_exported: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transparency_log_counting() {
        let log = TransparencyLog::new();

        log.record_sample(0);
        log.record_sample(2);
        log.record_derived();
        log.record_rows_exported(3);

        let stats = log.stats();
        assert_eq!(stats.samples_collected, 2);
        assert_eq!(stats.unavailable_readings, 2);
        assert_eq!(stats.derived_recomputations, 1);
        assert_eq!(stats.rows_exported, 3);
        assert_eq!(stats.callback_failures, 0);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transparency.json");

        let log = TransparencyLog::with_persistence(path.clone());
        log.record_sample(1);
        log.record_derived();
        log.save().unwrap();

        let reloaded = TransparencyLog::with_persistence(path);
        let stats = reloaded.stats();
        assert_eq!(stats.samples_collected, 1);
        assert_eq!(stats.unavailable_readings, 1);
        assert_eq!(stats.derived_recomputations, 1);
    }

    #[test]
    fn test_summary_format() {
        let log = TransparencyLog::new();
        let summary = log.summary();

        assert!(summary.contains("Samples collected"));
        assert!(summary.contains("Callback failures"));
        assert!(summary.contains("Collection Scope"));
        assert!(summary.contains("held in memory only"));
    }
}
