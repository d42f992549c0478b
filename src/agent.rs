//! The telemetry agent: lifecycle coordination over the collector, sampler,
//! scorer and exporter.
//!
//! A [`TelemetryAgent`] is a cheap handle; clones share one session. The
//! static snapshot is captured at most once. The sampler ticks on a tokio
//! task, and every tick appends exactly one sample, recomputes derived
//! telemetry every `derive_every_ticks` ticks, then fires the registered
//! callbacks outside all internal locks.

use crate::collector::provider::{ProbeError, SignalSources, StaticProbe};
use crate::collector::types::{ContinuousSample, StaticSnapshot};
use crate::config::{Config, DEFAULT_DERIVE_EVERY_TICKS};
use crate::core::export::{self, FlatRecord, RowSource, DEFAULT_DELIMITER};
use crate::core::sampler::{
    panic_message, spawn_ticker, Sampler, TickerHandle, DEFAULT_SAMPLE_PERIOD,
};
use crate::core::scorer::{self, DerivedTelemetry};
use crate::transparency::{create_shared_log, SharedTransparencyLog};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Error returned by a user callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CallbackError(pub String);

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// Which callback failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Sample,
    Derived,
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackKind::Sample => f.write_str("sample"),
            CallbackKind::Derived => f.write_str("derived"),
        }
    }
}

/// Agent errors.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("static snapshot capture failed: {0}")]
    Initialization(#[from] ProbeError),
    #[error("{kind} callback failed: {message}")]
    Callback { kind: CallbackKind, message: String },
    #[error("no tokio runtime available to drive the sampler")]
    NoRuntime,
}

pub type SampleCallback =
    Arc<dyn Fn(&ContinuousSample) -> Result<(), CallbackError> + Send + Sync>;
pub type DerivedCallback =
    Arc<dyn Fn(&DerivedTelemetry) -> Result<(), CallbackError> + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&AgentError) + Send + Sync>;

/// Runtime settings of one agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub sample_period: Duration,
    /// Recompute derived telemetry every this many ticks (minimum 1)
    pub derive_every_ticks: u32,
    pub delimiter: char,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            sample_period: DEFAULT_SAMPLE_PERIOD,
            derive_every_ticks: DEFAULT_DERIVE_EVERY_TICKS,
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

impl From<&Config> for AgentConfig {
    fn from(config: &Config) -> Self {
        Self {
            sample_period: config.sample_period,
            derive_every_ticks: config.derive_every_ticks,
            delimiter: config.delimiter,
        }
    }
}

#[derive(Default)]
struct Callbacks {
    sample: Option<SampleCallback>,
    derived: Option<DerivedCallback>,
    error: Option<ErrorCallback>,
}

#[derive(Debug, Default)]
struct Session {
    sampler: Sampler,
    ticks: u64,
    /// (sample count at recomputation, result), oldest first
    derived: Vec<(usize, Arc<DerivedTelemetry>)>,
}

impl Session {
    /// Latest derived telemetry computed at or before the sample at `index`.
    fn derived_at(&self, index: u64) -> Option<&DerivedTelemetry> {
        let covered = index as usize + 1;
        let pos = self.derived.partition_point(|(count, _)| *count <= covered);
        pos.checked_sub(1).map(|i| self.derived[i].1.as_ref())
    }
}

struct Inner {
    probe: Box<dyn StaticProbe>,
    sources: SignalSources,
    config: AgentConfig,
    session_id: String,
    snapshot: OnceCell<Arc<StaticSnapshot>>,
    session: Mutex<Session>,
    callbacks: Mutex<Callbacks>,
    ticker: Mutex<Option<TickerHandle>>,
    /// Bumped by stop and reset so a ticker from an earlier start never appends
    generation: AtomicU64,
    log: SharedTransparencyLog,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let ticker = self
            .ticker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = ticker.take() {
            handle.stop();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Orchestrates one telemetry session.
#[derive(Clone)]
pub struct TelemetryAgent {
    inner: Arc<Inner>,
}

impl fmt::Debug for TelemetryAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryAgent")
            .field("session_id", &self.inner.session_id)
            .field("config", &self.inner.config)
            .field("initialized", &self.inner.snapshot.initialized())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl TelemetryAgent {
    pub fn new(
        probe: impl StaticProbe + 'static,
        sources: SignalSources,
        config: AgentConfig,
    ) -> Self {
        Self::with_transparency_log(probe, sources, config, create_shared_log())
    }

    /// Like [`new`](Self::new), counting collection activity into a shared
    /// `log`, typically one persisted across sessions.
    pub fn with_transparency_log(
        probe: impl StaticProbe + 'static,
        sources: SignalSources,
        mut config: AgentConfig,
        log: SharedTransparencyLog,
    ) -> Self {
        config.derive_every_ticks = config.derive_every_ticks.max(1);
        Self {
            inner: Arc::new(Inner {
                probe: Box::new(probe),
                sources,
                config,
                session_id: Uuid::new_v4().to_string(),
                snapshot: OnceCell::new(),
                session: Mutex::new(Session::default()),
                callbacks: Mutex::new(Callbacks::default()),
                ticker: Mutex::new(None),
                generation: AtomicU64::new(0),
                log,
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn transparency_log(&self) -> &SharedTransparencyLog {
        &self.inner.log
    }

    /// Capture the static snapshot. Later calls return the same snapshot
    /// without probing again; a failed capture leaves the agent
    /// uninitialized so the call can be retried.
    pub async fn initialize(&self) -> Result<Arc<StaticSnapshot>, AgentError> {
        let snapshot = self
            .inner
            .snapshot
            .get_or_try_init(|| async {
                let snapshot = self.inner.probe.capture().await.map_err(|e| {
                    tracing::warn!(error = %e, "static snapshot capture failed");
                    AgentError::Initialization(e)
                })?;
                tracing::info!(
                    session_id = %self.inner.session_id,
                    capabilities = snapshot.capabilities.len(),
                    "static snapshot captured"
                );
                Ok::<_, AgentError>(Arc::new(snapshot))
            })
            .await?;
        Ok(Arc::clone(snapshot))
    }

    pub fn static_snapshot(&self) -> Option<Arc<StaticSnapshot>> {
        self.inner.snapshot.get().cloned()
    }

    /// Start ticking every `period`; the first tick fires immediately.
    /// Does nothing if already running.
    pub fn start(&self, period: Duration) -> Result<(), AgentError> {
        let mut ticker = lock(&self.inner.ticker);
        if ticker.is_some() {
            tracing::debug!("start ignored: already running");
            return Ok(());
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(AgentError::NoRuntime);
        }

        let generation = self.inner.generation.load(Ordering::SeqCst);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        *ticker = Some(spawn_ticker(period, move || {
            if let Some(inner) = weak.upgrade() {
                run_tick(&inner, generation);
            }
        }));

        tracing::info!(
            session_id = %self.inner.session_id,
            period_ms = period.as_millis() as u64,
            "sampling started"
        );
        Ok(())
    }

    /// Start with the configured period.
    pub fn start_default(&self) -> Result<(), AgentError> {
        self.start(self.inner.config.sample_period)
    }

    /// Stop ticking. Samples are kept; a tick already in progress completes.
    pub fn stop(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = lock(&self.inner.ticker).take() {
            handle.stop();
            tracing::info!(session_id = %self.inner.session_id, "sampling stopped");
        }
    }

    /// Stop and discard all samples and derived telemetry. The static
    /// snapshot is kept.
    pub fn reset(&self) {
        self.stop();
        let mut session = lock(&self.inner.session);
        session.sampler.reset();
        session.ticks = 0;
        session.derived.clear();
        tracing::info!(session_id = %self.inner.session_id, "session reset");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.ticker)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Register the per-sample callback, replacing any previous one.
    pub fn on_sample<F>(&self, callback: F)
    where
        F: Fn(&ContinuousSample) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        lock(&self.inner.callbacks).sample = Some(Arc::new(callback));
    }

    /// Register the derived telemetry callback, replacing any previous one.
    pub fn on_derived<F>(&self, callback: F)
    where
        F: Fn(&DerivedTelemetry) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        lock(&self.inner.callbacks).derived = Some(Arc::new(callback));
    }

    /// Register the callback that receives callback failures, replacing any
    /// previous one.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&AgentError) + Send + Sync + 'static,
    {
        lock(&self.inner.callbacks).error = Some(Arc::new(callback));
    }

    /// Take one sample immediately, outside the ticker.
    pub fn tick_now(&self) -> ContinuousSample {
        let tick = collect(&self.inner, &mut lock(&self.inner.session));
        notify(&self.inner, tick)
    }

    /// Compute derived telemetry over every sample so far.
    pub fn infer(&self) -> DerivedTelemetry {
        let snapshot = self.static_snapshot().unwrap_or_default();
        let session = lock(&self.inner.session);
        scorer::infer(&snapshot, session.sampler.samples())
    }

    pub fn samples(&self) -> Vec<ContinuousSample> {
        lock(&self.inner.session).sampler.samples().to_vec()
    }

    pub fn sample_count(&self) -> usize {
        lock(&self.inner.session).sampler.len()
    }

    /// The most recent throttled recomputation, if any.
    pub fn latest_derived(&self) -> Option<Arc<DerivedTelemetry>> {
        lock(&self.inner.session)
            .derived
            .last()
            .map(|(_, derived)| Arc::clone(derived))
    }

    /// Flatten the session: the static row, then one row per sample.
    pub fn export_flat(&self) -> Vec<FlatRecord> {
        let snapshot = self.static_snapshot().unwrap_or_default();
        let session = lock(&self.inner.session);
        let session_id = self.inner.session_id.as_str();

        let mut records = Vec::with_capacity(session.sampler.len() + 1);
        records.push(export::flatten(session_id, RowSource::Static(&snapshot)));
        for sample in session.sampler.samples() {
            records.push(export::flatten(
                session_id,
                RowSource::Continuous {
                    sample,
                    derived: session.derived_at(sample.index),
                },
            ));
        }

        self.inner.log.record_rows_exported(records.len() as u64);
        records
    }

    /// [`export_flat`](Self::export_flat) rendered with the configured delimiter.
    pub fn export_delimited_text(&self) -> String {
        export::to_delimited_text(&self.export_flat(), self.inner.config.delimiter)
    }
}

struct Tick {
    sample: ContinuousSample,
    derived: Option<Arc<DerivedTelemetry>>,
}

/// A ticker tick. Skipped when `generation` predates the latest stop or reset.
fn run_tick(inner: &Inner, generation: u64) -> Option<ContinuousSample> {
    let tick = {
        let mut session = lock(&inner.session);
        if generation != inner.generation.load(Ordering::SeqCst) {
            tracing::debug!("stale tick skipped");
            return None;
        }
        collect(inner, &mut session)
    };
    Some(notify(inner, tick))
}

/// Append one sample and, on throttle boundaries, recompute derived telemetry.
fn collect(inner: &Inner, session: &mut Session) -> Tick {
    let sample = session.sampler.tick(&inner.sources).clone();
    session.ticks += 1;
    inner.log.record_sample(sample.unavailable_count());
    tracing::debug!(
        index = sample.index,
        elapsed_ms = sample.elapsed_ms,
        unavailable = sample.unavailable_count(),
        "sample collected"
    );

    let derived = if session.ticks % u64::from(inner.config.derive_every_ticks) == 0 {
        let snapshot = inner.snapshot.get().cloned().unwrap_or_default();
        let derived = Arc::new(scorer::infer(&snapshot, session.sampler.samples()));
        let count = session.sampler.len();
        session.derived.push((count, Arc::clone(&derived)));
        inner.log.record_derived();
        tracing::debug!(
            samples = count,
            composite = ?derived.composite_risk_score,
            "derived telemetry recomputed"
        );
        Some(derived)
    } else {
        None
    };

    Tick { sample, derived }
}

/// Fire the callbacks for a collected tick. Must run with no internal lock held.
fn notify(inner: &Inner, tick: Tick) -> ContinuousSample {
    let (on_sample, on_derived, on_error) = {
        let callbacks = lock(&inner.callbacks);
        (
            callbacks.sample.clone(),
            callbacks.derived.clone(),
            callbacks.error.clone(),
        )
    };

    if let Some(callback) = on_sample {
        dispatch(inner, CallbackKind::Sample, on_error.as_ref(), || {
            callback(&tick.sample)
        });
    }
    if let (Some(callback), Some(derived)) = (on_derived, tick.derived.as_deref()) {
        dispatch(inner, CallbackKind::Derived, on_error.as_ref(), || {
            callback(derived)
        });
    }

    tick.sample
}

/// Run a user callback, routing an error or panic to the error callback.
fn dispatch(
    inner: &Inner,
    kind: CallbackKind,
    on_error: Option<&ErrorCallback>,
    call: impl FnOnce() -> Result<(), CallbackError>,
) {
    let message = match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err.0,
        Err(payload) => format!("callback panicked: {}", panic_message(payload.as_ref())),
    };

    inner.log.record_callback_failure();
    let error = AgentError::Callback { kind, message };
    match on_error {
        Some(on_error) => {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| on_error(&error))) {
                tracing::warn!(
                    %error,
                    panic = %panic_message(payload.as_ref()),
                    "error callback panicked"
                );
            }
        }
        None => tracing::warn!(%error, "callback failed"),
    }
}
