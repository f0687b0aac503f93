//! Groovebox - a MIDI-driven looper, synth and drum machine
//!
//! Entry point for the engine daemon.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use groovebox::config::EngineConfig;
use groovebox::engine::{AudioServer, CpalServer, Engine, PortFilter, PortKind};
use groovebox::modules::build_pipeline;

/// How often the control loop drains notifications.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

const NOMINAL_SAMPLE_RATE: u32 = 48000;

#[derive(Parser)]
#[command(name = "groovebox")]
#[command(about = "Real-time looper, synth and drum machine")]
#[command(version)]
struct Cli {
    /// JSON config file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Client name to register on the audio server
    #[arg(long)]
    client_name: Option<String>,

    /// cpal host to use (e.g. JACK, ALSA)
    #[arg(long)]
    host: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the physical ports and exit
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = EngineConfig::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(name) = cli.client_name {
        config.client_name = name;
    }
    if let Some(host) = cli.host {
        config.server.host = Some(host);
    }
    config.validate()?;

    info!("groovebox {} starting", env!("CARGO_PKG_VERSION"));

    if cli.list_ports {
        let server = CpalServer::open(&config.client_name, &config.server)?;
        list_ports(&server);
        return Ok(());
    }

    let server_config = config.server.clone();
    // The engine re-prepares every stage at the negotiated rate
    let pipeline = build_pipeline(&config, NOMINAL_SAMPLE_RATE);
    let mut engine = Engine::init(&config, pipeline, |name| {
        CpalServer::open(name, &server_config)
    })?;
    engine.start_processing();

    if !engine.is_running() {
        warn!("Audio server went away during startup");
    }

    engine.run_until(shutdown_signal(), POLL_INTERVAL).await;

    info!(
        "Processed {} blocks, rejected {}",
        engine.state().processed_blocks(),
        engine.state().rejected_blocks()
    );
    info!("groovebox shutdown complete");
    Ok(())
}

fn list_ports(server: &CpalServer) {
    let groups = [
        ("Audio capture", PortFilter::physical_sources(PortKind::Audio)),
        ("Audio playback", PortFilter::physical_sinks(PortKind::Audio)),
        ("MIDI capture", PortFilter::physical_sources(PortKind::Midi)),
        ("MIDI playback", PortFilter::physical_sinks(PortKind::Midi)),
    ];
    println!("Host: {}", server.host_name());
    for (label, filter) in groups {
        println!("{}:", label);
        for name in server.find_ports(filter) {
            println!("  {}", name);
        }
    }
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT (Ctrl+C), shutting down"),
            Err(e) => {
                warn!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    let terminate = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, shutting down");
                }
                Err(e) => {
                    warn!("Cannot listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

