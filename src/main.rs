//! Session Telemetry Agent CLI
//!
//! Periodic host telemetry with inferred session scores.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use session_telemetry_agent::{
    collector::{SyntheticProbe, SyntheticSignals},
    config::{Config, SourceConfig},
    transparency::create_shared_log_with_persistence,
    AgentConfig, SharedTransparencyLog, SignalSources, StaticProbe, TelemetryAgent,
    COLLECTION_DECLARATION, VERSION,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "telemetry-agent")]
#[command(version = VERSION)]
#[command(about = "Periodic host telemetry with inferred session scores", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start sampling until Ctrl+C or the duration elapses
    Start {
        /// Milliseconds between samples (defaults to the configured period)
        #[arg(long)]
        period_ms: Option<u64>,

        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Use deterministic synthetic signals instead of the host
        #[arg(long)]
        synthetic: bool,

        /// Signal categories to sample (network, memory, activity, battery, or all)
        #[arg(long, default_value = "all")]
        sources: String,

        /// Export format
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
    },

    /// Capture and print the static snapshot
    Probe {
        /// Use the synthetic probe instead of the host
        #[arg(long)]
        synthetic: bool,
    },

    /// Show configuration and cumulative statistics
    Status,

    /// Show configuration
    Config,

    /// Display the collection declaration
    Declaration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("session_telemetry_agent=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            period_ms,
            duration_secs,
            synthetic,
            sources,
            format,
        } => cmd_start(period_ms, duration_secs, synthetic, &sources, format).await,
        Commands::Probe { synthetic } => cmd_probe(synthetic).await,
        Commands::Status => {
            cmd_status();
            Ok(())
        }
        Commands::Config => cmd_config(),
        Commands::Declaration => {
            println!("{COLLECTION_DECLARATION}");
            Ok(())
        }
    }
}

async fn cmd_start(
    period_ms: Option<u64>,
    duration_secs: Option<u64>,
    synthetic: bool,
    sources: &str,
    format: ExportFormat,
) -> Result<()> {
    println!("Session Telemetry Agent v{VERSION}");
    println!();

    let source_config = SourceConfig::from_csv(sources);
    if !source_config.any_enabled() {
        bail!("at least one source must be enabled (network, memory, activity or battery)");
    }

    let mut config = Config::load().unwrap_or_default();
    config.sources = source_config;
    if let Some(ms) = period_ms {
        config.sample_period = Duration::from_millis(ms.max(1));
    }
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    println!("Starting collection...");
    println!("  Sources: {}", config.sources.enabled_names().join(", "));
    println!("  Period: {}ms", config.sample_period.as_millis());
    println!(
        "  Derived telemetry: every {} samples",
        config.derive_every_ticks
    );
    println!("  Provider: {}", if synthetic { "synthetic" } else { "host" });
    println!();

    let transparency_log =
        create_shared_log_with_persistence(config.data_path.join("transparency.json"));

    let agent = build_agent(synthetic, &config, transparency_log.clone())?;
    println!("Session ID: {}", agent.session_id());

    let snapshot = agent
        .initialize()
        .await
        .context("could not capture the static snapshot")?;
    println!(
        "Device: {} ({} cores)",
        snapshot.device.platform.as_deref().unwrap_or("unknown"),
        snapshot
            .device
            .cpu_cores
            .map_or_else(|| "?".to_string(), |n| n.to_string())
    );

    agent.on_derived(|derived| {
        println!(
            "[{}] {} samples | presence: {} | reliability: {} | stability: {} | risk: {}",
            Utc::now().format("%H:%M:%S"),
            derived.sample_count,
            score(derived.presence_score),
            score(derived.network_reliability_score),
            score(derived.network_stability_score),
            derived.risk_level.map_or("n/a", |r| r.as_str()),
        );
        Ok(())
    });
    agent.on_error(|err| eprintln!("Warning: {err}"));

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    println!();
    match duration_secs {
        Some(secs) => println!("Running for {secs}s (Ctrl+C to stop early)"),
        None => println!("Press Ctrl+C to stop"),
    }
    println!();

    agent.start_default()?;

    let deadline = duration_secs.map(|secs| Instant::now() + Duration::from_secs(secs));
    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    println!();
    println!("Stopping collection...");
    agent.stop();

    if agent.sample_count() > 0 {
        let export_path = config.export_path.join(format!(
            "session_{}.{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            format.extension()
        ));
        let body = match format {
            ExportFormat::Csv => agent.export_delimited_text(),
            ExportFormat::Json => serde_json::to_string_pretty(&agent.export_flat())?,
        };
        match std::fs::write(&export_path, body) {
            Ok(()) => println!(
                "Exported {} samples to {:?}",
                agent.sample_count(),
                export_path
            ),
            Err(e) => eprintln!("Error writing export: {e}"),
        }
    }

    if let Err(e) = transparency_log.save() {
        eprintln!("Warning: Could not save transparency log: {e}");
    }

    println!();
    println!("{}", transparency_log.summary());
    Ok(())
}

fn build_agent(
    synthetic: bool,
    config: &Config,
    log: SharedTransparencyLog,
) -> Result<TelemetryAgent> {
    let agent_config = AgentConfig::from(config);
    if synthetic {
        let sources = SyntheticSignals::wandering()
            .into_sources()
            .restrict_to(&config.sources);
        return Ok(TelemetryAgent::with_transparency_log(
            SyntheticProbe::laptop(),
            sources,
            agent_config,
            log,
        ));
    }
    let (probe, sources) = host_provider()?;
    Ok(TelemetryAgent::with_transparency_log(
        probe,
        sources.restrict_to(&config.sources),
        agent_config,
        log,
    ))
}

#[cfg(feature = "host")]
fn host_provider() -> Result<(Box<dyn StaticProbe>, SignalSources)> {
    use session_telemetry_agent::collector::{host_sources, HostProbe};
    Ok((Box::new(HostProbe), host_sources()))
}

#[cfg(not(feature = "host"))]
fn host_provider() -> Result<(Box<dyn StaticProbe>, SignalSources)> {
    bail!("host provider not compiled in (enable the `host` feature) - use --synthetic")
}

async fn cmd_probe(synthetic: bool) -> Result<()> {
    let snapshot = if synthetic {
        SyntheticProbe::laptop().capture().await?
    } else {
        let (probe, _) = host_provider()?;
        probe.capture().await?
    };
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("Session Telemetry Agent Status");
    println!("==============================");
    println!();

    println!("Configuration:");
    println!("  Sources: {}", config.sources.enabled_names().join(", "));
    println!("  Period: {}ms", config.sample_period.as_millis());
    println!(
        "  Derived telemetry: every {} samples",
        config.derive_every_ticks
    );
    println!("  Export path: {:?}", config.export_path);
    println!();

    let stats_path = config.data_path.join("transparency.json");
    if stats_path.exists() {
        if let Ok(content) = std::fs::read_to_string(&stats_path) {
            if let Ok(stats) = serde_json::from_str::<serde_json::Value>(&content) {
                println!("Cumulative Statistics:");
                for (key, label) in [
                    ("samples_collected", "Samples collected"),
                    ("unavailable_readings", "Unavailable readings"),
                    ("derived_recomputations", "Derived recomputations"),
                    ("callback_failures", "Callback failures"),
                    ("rows_exported", "Rows exported"),
                ] {
                    if let Some(value) = stats.get(key) {
                        println!("  {label}: {value}");
                    }
                }
            }
        }
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_config() -> Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn score(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.0}"))
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("error setting Ctrl+C handler")
}
