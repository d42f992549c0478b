//! Periodic sampling of the continuous signals.
//!
//! [`Sampler`] composes one [`ContinuousSample`] per tick from the signal
//! sources and appends it to the session's [`SampleSequence`]. A failing or
//! panicking source only turns its own slot into an unavailable reading.
//! [`spawn_ticker`] drives any tick function on a fixed period.

use crate::collector::provider::{SignalError, SignalSources};
use crate::collector::types::{ContinuousSample, Reading};
use crate::core::sequence::SampleSequence;
use chrono::Utc;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Default tick period.
pub const DEFAULT_SAMPLE_PERIOD: Duration = Duration::from_millis(5000);

/// Shortest period the ticker accepts.
pub const MIN_SAMPLE_PERIOD: Duration = Duration::from_millis(1);

/// Builds samples and owns the sample sequence of one session.
#[derive(Debug, Default)]
pub struct Sampler {
    sequence: SampleSequence,
    origin: Option<Instant>,
}

impl Sampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one sample now.
    pub fn tick(&mut self, sources: &SignalSources) -> &ContinuousSample {
        self.tick_at(sources, Instant::now())
    }

    /// Take one sample, measuring elapsed time against `now`.
    /// The first tick of a session defines the origin.
    pub fn tick_at(&mut self, sources: &SignalSources, now: Instant) -> &ContinuousSample {
        let origin = *self.origin.get_or_insert(now);
        let elapsed_ms = now.saturating_duration_since(origin).as_millis() as u64;

        let sample = ContinuousSample {
            index: 0,
            elapsed_ms,
            captured_at: Utc::now(),
            network: read_guarded("network", || sources.network.read()),
            memory: read_guarded("memory", || sources.memory.read()),
            activity: read_guarded("activity", || sources.activity.read()),
            battery: read_guarded("battery", || sources.battery.read()),
        };

        self.sequence.push(sample)
    }

    pub fn samples(&self) -> &[ContinuousSample] {
        self.sequence.as_slice()
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Discard all samples; the next tick starts a new session at offset 0.
    pub fn reset(&mut self) {
        self.sequence.clear();
        self.origin = None;
    }
}

/// Read one signal, converting errors and panics into an unavailable slot.
fn read_guarded<T>(
    category: &'static str,
    read: impl FnOnce() -> Result<T, SignalError>,
) -> Reading<T> {
    match panic::catch_unwind(AssertUnwindSafe(read)) {
        Ok(Ok(value)) => Reading::available(value),
        Ok(Err(err)) => {
            tracing::debug!(category, error = %err, "signal unavailable");
            Reading::unavailable(err.to_string())
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(category, %message, "signal provider panicked");
            Reading::unavailable(format!("provider panicked: {message}"))
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a running ticker task.
#[derive(Debug)]
pub struct TickerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TickerHandle {
    /// Ask the ticker to stop. A tick already running completes; no further
    /// tick is started.
    pub fn stop(self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a task calling `on_tick` every `period`, starting immediately.
///
/// Must be called from within a tokio runtime.
pub fn spawn_ticker<F>(period: Duration, mut on_tick: F) -> TickerHandle
where
    F: FnMut() + Send + 'static,
{
    let period = period.max(MIN_SAMPLE_PERIOD);
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => on_tick(),
            }
        }
        tracing::debug!("ticker stopped");
    });

    TickerHandle { shutdown, task }
}
