//! Integration tests for the telemetry agent lifecycle

use session_telemetry_agent::collector::{
    ActivityReading, NetworkReading, Scripted, SignalError, SyntheticProbe, SyntheticSignals,
    SyntheticSource,
};
use session_telemetry_agent::core::{export::header, DeviceClass};
use session_telemetry_agent::{
    AgentConfig, AgentError, DerivedTelemetry, RiskLevel, SourceConfig, TelemetryAgent,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PERIOD: Duration = Duration::from_millis(100);

fn config(derive_every_ticks: u32) -> AgentConfig {
    AgentConfig {
        sample_period: PERIOD,
        derive_every_ticks,
        ..AgentConfig::default()
    }
}

fn steady_agent() -> TelemetryAgent {
    TelemetryAgent::new(
        SyntheticProbe::laptop(),
        SyntheticSignals::steady().into_sources(),
        config(5),
    )
}

/// Let the ticker's immediate first tick run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_initialize_is_idempotent() {
    let probe = Arc::new(SyntheticProbe::laptop());
    let agent = TelemetryAgent::new(
        probe.clone(),
        SyntheticSignals::steady().into_sources(),
        config(5),
    );

    let first = agent.initialize().await.unwrap();
    let second = agent.initialize().await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(*first, *second);
    assert_eq!(probe.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_initialize_captures_once() {
    let probe = Arc::new(SyntheticProbe::laptop().with_delay(Duration::from_millis(50)));
    let agent = TelemetryAgent::new(
        probe.clone(),
        SyntheticSignals::steady().into_sources(),
        config(5),
    );

    let (a, b) = tokio::join!(agent.initialize(), agent.initialize());

    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(probe.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_initialize_can_be_retried() {
    let probe = Arc::new(SyntheticProbe::laptop().failing_first(1));
    let agent = TelemetryAgent::new(
        probe.clone(),
        SyntheticSignals::steady().into_sources(),
        config(5),
    );

    let err = agent.initialize().await.unwrap_err();
    assert!(matches!(err, AgentError::Initialization(_)));
    assert!(agent.static_snapshot().is_none());

    let snapshot = agent.initialize().await.unwrap();
    assert_eq!(snapshot.device.cpu_cores, Some(8));
    assert_eq!(probe.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sampling_continues_while_initialize_waits() {
    let agent = TelemetryAgent::new(
        SyntheticProbe::laptop().with_delay(Duration::from_millis(1000)),
        SyntheticSignals::steady().into_sources(),
        config(1),
    );
    agent.start(PERIOD).unwrap();

    let (snapshot, (count, early_snapshot, early_derived)) =
        tokio::join!(agent.initialize(), async {
            tokio::time::sleep(Duration::from_millis(550)).await;
            (
                agent.sample_count(),
                agent.static_snapshot(),
                agent.latest_derived(),
            )
        });

    assert!(count > 1, "ticks stalled behind initialize: {count}");
    assert!(early_snapshot.is_none());
    assert_eq!(early_derived.unwrap().device_class, None);

    snapshot.unwrap();
    tokio::time::sleep(PERIOD).await;
    let derived = agent.latest_derived().unwrap();
    assert_eq!(derived.device_class, Some(DeviceClass::HighEnd));
    assert!(agent.sample_count() > count);
    agent.stop();
}

#[tokio::test(start_paused = true)]
async fn test_sampling_is_monotonic_one_sample_per_tick() {
    let agent = steady_agent();
    agent.start(PERIOD).unwrap();
    settle().await;
    assert_eq!(agent.sample_count(), 1);

    for expected in 2..=6 {
        tokio::time::sleep(PERIOD).await;
        assert_eq!(agent.sample_count(), expected);
    }
    agent.stop();

    let samples = agent.samples();
    for (i, pair) in samples.windows(2).enumerate() {
        assert_eq!(pair[0].index, i as u64);
        assert!(pair[0].elapsed_ms < pair[1].elapsed_ms);
    }
    assert_eq!(samples[0].elapsed_ms, 0);
    assert_eq!(samples[1].elapsed_ms, 100);
}

#[tokio::test(start_paused = true)]
async fn test_start_while_running_is_a_no_op() {
    let agent = steady_agent();
    agent.start(PERIOD).unwrap();
    agent.start(PERIOD).unwrap();
    agent.start(Duration::from_millis(10)).unwrap();
    settle().await;

    assert!(agent.is_running());
    assert_eq!(agent.sample_count(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(agent.sample_count(), 2);
    agent.stop();
}

#[tokio::test(start_paused = true)]
async fn test_stop_halts_ticking_and_keeps_samples() {
    let agent = steady_agent();
    agent.start(PERIOD).unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(agent.sample_count(), 3);

    agent.stop();
    assert!(!agent.is_running());
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(agent.sample_count(), 3);

    agent.start(PERIOD).unwrap();
    settle().await;
    let samples = agent.samples();
    assert_eq!(samples.len(), 4);
    assert!(samples[3].elapsed_ms > samples[2].elapsed_ms);
    agent.stop();
}

#[tokio::test(start_paused = true)]
async fn test_reset_clears_state() {
    let agent = steady_agent();
    agent.initialize().await.unwrap();
    agent.start(PERIOD).unwrap();
    tokio::time::sleep(Duration::from_millis(550)).await;
    assert!(agent.latest_derived().is_some());

    agent.reset();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(!agent.is_running());
    assert_eq!(agent.sample_count(), 0);
    assert!(agent.latest_derived().is_none());
    assert_eq!(agent.infer(), DerivedTelemetry::insufficient());
    assert_eq!(agent.export_flat().len(), 1);
    assert!(agent.static_snapshot().is_some());

    agent.tick_now();
    assert_eq!(agent.samples()[0].elapsed_ms, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failing_sample_callback_is_isolated() {
    let agent = steady_agent();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    agent.on_sample(move |sample| {
        counter.fetch_add(1, Ordering::SeqCst);
        if sample.index % 2 == 0 {
            panic!("consumer blew up on {}", sample.index);
        }
        Err("consumer rejected sample".into())
    });
    agent.on_error(move |err| sink.lock().unwrap().push(err.to_string()));

    agent.start(PERIOD).unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    agent.stop();

    assert_eq!(agent.sample_count(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 3);
    assert!(errors[0].contains("consumer blew up on 0"));
    assert!(errors[1].contains("consumer rejected sample"));
    assert_eq!(agent.transparency_log().stats().callback_failures, 3);
}

#[tokio::test(start_paused = true)]
async fn test_failing_callback_without_error_handler_is_logged_only() {
    let agent = steady_agent();
    agent.on_sample(|_| Err("nobody listening".into()));

    agent.tick_now();
    agent.tick_now();

    assert_eq!(agent.sample_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_registering_callback_replaces_previous() {
    let agent = steady_agent();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let f = first.clone();
    agent.on_sample(move |_| {
        f.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let s = second.clone();
    agent.on_sample(move |_| {
        s.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    agent.tick_now();

    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_derived_recomputed_every_n_ticks() {
    let agent = TelemetryAgent::new(
        SyntheticProbe::laptop(),
        SyntheticSignals::steady().into_sources(),
        config(5),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    agent.on_derived(move |derived| {
        sink.lock().unwrap().push(derived.sample_count);
        Ok(())
    });

    for _ in 0..12 {
        agent.tick_now();
    }

    assert_eq!(*seen.lock().unwrap(), vec![5, 10]);
    assert_eq!(agent.latest_derived().unwrap().sample_count, 10);
    assert_eq!(agent.infer().sample_count, 12);
}

#[tokio::test(start_paused = true)]
async fn test_presence_ratio_three_of_ten() {
    let signals = SyntheticSignals::steady().with_activity(SyntheticSource::from_fn(|n| {
        Scripted::Value(ActivityReading {
            visible: n < 3,
            focused: n < 3,
            idle_secs: None,
        })
    }));
    let agent = TelemetryAgent::new(SyntheticProbe::laptop(), signals.into_sources(), config(5));

    for _ in 0..10 {
        agent.tick_now();
    }

    let derived = agent.infer();
    assert_eq!(derived.presence_ratio, Some(0.3));
    assert_eq!(derived.presence_score, Some(30.0));
}

#[tokio::test(start_paused = true)]
async fn test_steady_session_scores_low_risk() {
    let agent = steady_agent();
    agent.initialize().await.unwrap();
    for _ in 0..5 {
        agent.tick_now();
    }

    let derived = agent.infer();
    assert_eq!(derived.presence_score, Some(100.0));
    assert_eq!(derived.network_reliability_score, Some(100.0));
    assert_eq!(derived.network_stability_score, Some(100.0));
    assert_eq!(derived.composite_risk_score, Some(100));
    assert_eq!(derived.risk_level, Some(RiskLevel::Low));
}

#[tokio::test(start_paused = true)]
async fn test_scores_stay_in_range_with_failing_sources() {
    let signals = SyntheticSignals::wandering()
        .with_network(SyntheticSource::failing_on(
            NetworkReading {
                online: true,
                connection_type: Some("wifi".into()),
                rtt_ms: Some(80.0),
                ..NetworkReading::default()
            },
            vec![1, 4, 5, 9],
            SignalError::ReadFailed("host binding timed out".into()),
        ))
        .with_battery(SyntheticSource::script(vec![Scripted::Panic("battery api crashed")]));
    let agent = TelemetryAgent::new(SyntheticProbe::laptop(), signals.into_sources(), config(3));
    agent.initialize().await.unwrap();

    for ticks in 0..40 {
        let derived = agent.infer();
        for score in [
            derived.presence_ratio.map(|r| r * 100.0),
            derived.presence_score,
            derived.focus_ratio.map(|r| r * 100.0),
            derived.network_reliability_score,
            derived.network_stability_score,
            derived.memory_pressure_score,
            derived.battery_drain_per_hour,
            derived.capability_coverage_score,
            derived.composite_risk_score.map(f64::from),
        ]
        .into_iter()
        .flatten()
        {
            assert!((0.0..=100.0).contains(&score), "score {score} after {ticks} ticks");
        }
        assert_eq!(derived.risk_level.is_some(), derived.composite_risk_score.is_some());
        agent.tick_now();
    }

    let samples = agent.samples();
    assert_eq!(samples.len(), 40);
    assert!(samples.iter().all(|s| !s.battery.is_available()));
    assert!(!samples[1].network.is_available());
    assert!(samples[2].network.is_available());
}

#[tokio::test(start_paused = true)]
async fn test_export_rows_have_every_column_in_order() {
    let agent = steady_agent();
    agent.initialize().await.unwrap();
    for _ in 0..7 {
        agent.tick_now();
    }

    let records = agent.export_flat();
    assert_eq!(records.len(), 8);
    for record in &records {
        assert_eq!(record.column_names(), header());
        assert_eq!(record.get("session_id"), Some(agent.session_id()));
    }
    assert_eq!(records[0].get("record_type"), Some("static"));
    assert_eq!(records[0].get("device_cpu_cores"), Some("8"));
    assert!(records[1..]
        .iter()
        .all(|r| r.get("record_type") == Some("continuous")));
    assert_eq!(records[4].get("risk_level"), None);
    assert_eq!(records[5].get("risk_level"), Some("Low"));

    let text = agent.export_delimited_text();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 9);
    assert_eq!(lines[0], header().join(","));
    assert!(text.ends_with('\n'));
}

#[tokio::test(start_paused = true)]
async fn test_export_uses_configured_delimiter() {
    let agent = TelemetryAgent::new(
        SyntheticProbe::laptop(),
        SyntheticSignals::steady().into_sources(),
        AgentConfig {
            delimiter: ';',
            ..config(5)
        },
    );
    agent.tick_now();

    let text = agent.export_delimited_text();
    let first = text.lines().next().unwrap();
    assert!(first.starts_with("schema_version;session_id;record_type"));
}

#[tokio::test(start_paused = true)]
async fn test_disabled_sources_are_unavailable() {
    let sources = SyntheticSignals::steady()
        .into_sources()
        .restrict_to(&SourceConfig::from_csv("network,activity"));
    let agent = TelemetryAgent::new(SyntheticProbe::laptop(), sources, config(5));

    let sample = agent.tick_now();

    assert!(sample.network.is_available());
    assert!(sample.activity.is_available());
    assert!(!sample.memory.is_available());
    assert!(!sample.battery.is_available());
    let records = agent.export_flat();
    assert_eq!(records[1].get("unavailable_signals"), Some("memory;battery"));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_agent_stops_ticker() {
    let signals = SyntheticSignals::steady();
    let network = signals.network.clone();
    let agent = TelemetryAgent::new(SyntheticProbe::laptop(), signals.into_sources(), config(5));
    agent.start(PERIOD).unwrap();
    settle().await;
    assert_eq!(network.calls(), 1);

    drop(agent);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(network.calls(), 1);
}
