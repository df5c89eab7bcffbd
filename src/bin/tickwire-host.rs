//! tickwire host - drives a bridge from a fixed-rate tick loop.
//!
//! Stands in for a host application: it ticks the bridge every
//! `--tick-ms` milliseconds on the main thread until Ctrl-C.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tickwire::transport::{default_pipe_paths, DEFAULT_HOST, DEFAULT_PORT};
use tickwire::{Bridge, BridgeConfig, Endpoint, StaticCatalog};

#[derive(Parser, Debug)]
#[command(name = "tickwire-host")]
#[command(about = "Single-threaded host driving a tickwire bridge")]
struct Args {
    /// JSON config file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Controller host
    #[arg(long)]
    host: Option<String>,

    /// Controller port
    #[arg(short, long)]
    port: Option<u16>,

    /// Use the platform's default pipe pair instead of TCP
    #[arg(long, conflicts_with_all = ["host", "port"])]
    pipes: bool,

    /// JSON catalog tree served by `plugins` and `load_item`
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Milliseconds per host tick
    #[arg(long, default_value = "100")]
    tick_ms: u64,

    /// Path reported by the `path` action
    #[arg(long)]
    module_path: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn load_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => BridgeConfig::default(),
    };

    if args.pipes {
        config.endpoint = Endpoint::default_pipes();
    } else if args.host.is_some() || args.port.is_some() {
        let (host, port) = match &config.endpoint {
            Endpoint::Tcp { host, port } => (host.clone(), *port),
            Endpoint::Pipes { .. } => (DEFAULT_HOST.to_string(), DEFAULT_PORT),
        };
        config.endpoint = Endpoint::Tcp {
            host: args.host.clone().unwrap_or(host),
            port: args.port.unwrap_or(port),
        };
    }

    if let Some(path) = &args.module_path {
        config.module_path = Some(path.clone());
    }

    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = load_config(&args)?;
    let catalog = match &args.catalog {
        Some(path) => StaticCatalog::from_file(path)
            .with_context(|| format!("loading catalog {}", path.display()))?,
        None => StaticCatalog::default(),
    };

    if let Endpoint::Pipes { request, response } = &config.endpoint {
        let (default_request, default_response) = default_pipe_paths();
        info!(
            request = %request.display(),
            response = %response.display(),
            defaults = request == &default_request && response == &default_response,
            "using pipe pair"
        );
    }

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("installing Ctrl-C handler")?;

    let mut bridge = Bridge::builder()
        .config(config)
        .catalog(catalog)
        .build()
        .context("starting bridge")?;

    info!("Host loop running, Ctrl-C to stop");

    let tick = Duration::from_millis(args.tick_ms.max(1));
    let mut next = Instant::now();
    while running.load(Ordering::SeqCst) {
        bridge.tick();

        next += tick;
        let now = Instant::now();
        if next > now {
            std::thread::sleep(next - now);
        } else {
            next = now;
        }
    }

    info!("Shutdown signal received, stopping bridge");
    bridge.shutdown();
    Ok(())
}
