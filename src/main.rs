//! btroute demo binary
//!
//! Drives the route coordinator against the simulated Bluetooth stack so
//! the connect/retry/timeout machinery can be watched end to end.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use colored::*;
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use btroute::bridge::{EventBridge, EventBridgeHandle, ExternalEvent};
use btroute::config::RouteConfig;
use btroute::device::{AudioState, ConnectionState, Device, ProfileType};
use btroute::registry::DeviceRegistry;
use btroute::route::RouteManager;
use btroute::sim::{LogListener, SimHandsFree, SimHearingAid};

/// Bluetooth call-audio route coordinator - simulated stack demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "btroute.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Scenario to run: lifecycle, retry
    #[arg(long, default_value = "lifecycle")]
    scenario: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = if Path::new(&args.config).exists() {
        info!("loading configuration from {}", args.config);
        RouteConfig::load(&args.config).await?
    } else {
        info!("no configuration file at {}, using defaults", args.config);
        RouteConfig::default()
    };

    match args.scenario.as_str() {
        "lifecycle" => run_lifecycle(config).await,
        "retry" => run_retry(config).await,
        other => anyhow::bail!("unknown scenario: {other}"),
    }
}

/// Connect a headset, confirm audio, then hang up.
async fn run_lifecycle(config: RouteConfig) -> Result<()> {
    println!("\n{}", "=== Call-audio lifecycle ===".bold().cyan());

    let (manager, bridge, hands_free, _hearing_aid) = build_stack(config);
    let headset = Device::new("00:11:22:33:44:55", ProfileType::HandsFree);

    bridge.deliver(ExternalEvent::ConnectionStateChanged {
        device: headset.clone(),
        old_state: ConnectionState::Connecting,
        new_state: ConnectionState::Connected,
    });
    bridge.set_in_call(true);
    settle().await;
    print_state("after headset connected", &manager).await;

    manager.connect_audio(Some(headset.address.clone()));
    settle().await;
    print_state("after connect request", &manager).await;

    bridge.deliver(ExternalEvent::AudioStateChanged {
        device: headset.clone(),
        state: AudioState::Connected,
    });
    settle().await;
    print_state("after stack confirmed audio", &manager).await;

    manager.disconnect_audio();
    bridge.deliver(ExternalEvent::AudioStateChanged {
        device: headset.clone(),
        state: AudioState::Disconnected,
    });
    bridge.set_in_call(false);
    settle().await;
    print_state("after hangup", &manager).await;

    println!(
        "  headset connection attempts: {}",
        hands_free
            .attempts_for(&headset.address)
            .to_string()
            .green()
    );
    Ok(())
}

/// Watch the bounded-retry machinery give up on a broken link.
async fn run_retry(mut config: RouteConfig) -> Result<()> {
    println!("\n{}", "=== Bounded connect retries ===".bold().cyan());
    config.retry_backoff_ms = 200;

    let (manager, bridge, hands_free, _hearing_aid) = build_stack(config);
    let headset = Device::new("00:11:22:33:44:55", ProfileType::HandsFree);

    bridge.deliver(ExternalEvent::ConnectionStateChanged {
        device: headset.clone(),
        old_state: ConnectionState::Connecting,
        new_state: ConnectionState::Connected,
    });
    hands_free.set_connect_audio_result(false);
    settle().await;

    manager.connect_audio(Some(headset.address.clone()));
    sleep(Duration::from_millis(800)).await;
    print_state("after retries exhausted", &manager).await;

    println!(
        "  connection attempts (1 initial + 2 retries): {}",
        hands_free
            .attempts_for(&headset.address)
            .to_string()
            .green()
    );
    Ok(())
}

fn build_stack(
    config: RouteConfig,
) -> (
    Arc<RouteManager>,
    EventBridgeHandle,
    Arc<SimHandsFree>,
    Arc<SimHearingAid>,
) {
    let registry = Arc::new(DeviceRegistry::new());
    let hands_free = SimHandsFree::new();
    let hearing_aid = SimHearingAid::new();
    let manager = Arc::new(RouteManager::new(
        config,
        registry,
        Arc::new(LogListener),
    ));
    let bridge = EventBridge::spawn(manager.clone());
    bridge.deliver(ExternalEvent::HandsFreeServiceConnected {
        proxy: hands_free.clone(),
    });
    bridge.deliver(ExternalEvent::HearingAidServiceConnected {
        proxy: hearing_aid.clone(),
    });
    (manager, bridge, hands_free, hearing_aid)
}

async fn print_state(label: &str, manager: &RouteManager) {
    let state = manager
        .handle()
        .query_state()
        .await
        .map(|s| s.name())
        .unwrap_or_else(|| "unknown".to_string());
    println!("  {label}: {}", state.yellow());
}

async fn settle() {
    sleep(Duration::from_millis(50)).await;
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}
