//! Soilbridge node entry point
//!
//! Runs the bridge or the sensor role against a serial device, or both roles
//! in one process linked by an in-memory serial line when no device is set.

use clap::{Parser, Subcommand};
use soilbridge::config::{ConfigError, NodeConfig};
use soilbridge::error::NodeResult;
use soilbridge::node::{
    simulated_hardware, BridgeNode, HostNetwork, NodeExit, SensorNode, COLD_RESET_EXIT_CODE,
};
use soilbridge::observability::init_default_logging;
use soilbridge::router::Role;
use soilbridge::transport::{build_transport, SerialLink};
use std::path::PathBuf;
use std::process;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Size of the in-process serial line buffer
const LOOPBACK_BUFFER: usize = 4096;

/// Soil-moisture sensor node and Wi-Fi bridge
#[derive(Parser)]
#[command(name = "soilbridge")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "SOILBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (repeat for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node
    Run,
    /// Validate configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging(cli.verbose);

    info!("Starting soilbridge v{}", env!("CARGO_PKG_VERSION"));

    let (config, source) = match NodeConfig::load(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    if let Some(path) = &source {
        info!("Loaded configuration from {}", path.display());
    }

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Config { show } => {
            if let Err(e) = show_config(&config, show) {
                error!("Command failed: {}", e);
                process::exit(1);
            }
        }
    }
}

fn show_config(config: &NodeConfig, show: bool) -> Result<(), ConfigError> {
    if show {
        println!("{}", config.to_redacted_toml()?);
    } else {
        println!("Configuration is valid");
    }
    Ok(())
}

async fn run(config: NodeConfig) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut restarts = 0u32;
    loop {
        match run_once(&config, shutdown_rx.clone()).await {
            Ok(NodeExit::Shutdown) => {
                info!("Application shutdown complete");
                return;
            }
            Ok(NodeExit::SoftRestart) => {
                restarts += 1;
                info!(restarts, "Soft restart, rebuilding node state");
            }
            Ok(NodeExit::ColdReset) => {
                warn!("Cold reset, exiting for supervisor restart");
                process::exit(COLD_RESET_EXIT_CODE);
            }
            Err(e) => {
                error!("Node failed: {}", e);
                process::exit(1);
            }
        }
    }
}

async fn run_once(config: &NodeConfig, shutdown: watch::Receiver<bool>) -> NodeResult<NodeExit> {
    match config.serial.device.as_deref() {
        None => run_combined(config, shutdown).await,
        Some(device) => {
            let serial = open_device(device, config.serial.baud_rate)?;
            match config.node.role {
                Role::Bridge => build_bridge(config, serial)?.run(shutdown).await,
                Role::Sensor => build_sensor(config, serial).run(shutdown).await,
            }
        }
    }
}

/// Both roles in one process over an in-memory serial line. Whichever node
/// finishes first decides the exit.
async fn run_combined(
    config: &NodeConfig,
    shutdown: watch::Receiver<bool>,
) -> NodeResult<NodeExit> {
    info!("No serial device configured, running bridge and sensor in-process");
    let (bridge_end, sensor_end) = tokio::io::duplex(LOOPBACK_BUFFER);
    let mut bridge = build_bridge(config, SerialLink::new(bridge_end))?;
    let mut sensor = build_sensor(config, SerialLink::new(sensor_end));

    tokio::select! {
        result = bridge.run(shutdown.clone()) => result,
        result = sensor.run(shutdown) => result,
    }
}

fn build_bridge(config: &NodeConfig, serial: SerialLink) -> NodeResult<BridgeNode> {
    let endpoint = config.endpoint();
    let network = HostNetwork::new(
        &config.node.device_id,
        &config.network.host_ssid,
        &endpoint.socket_address(),
    );
    let transport = build_transport(config.server.transport, endpoint);
    BridgeNode::new(config, Box::new(network), transport, serial)
}

fn build_sensor(
    config: &NodeConfig,
    serial: SerialLink,
) -> SensorNode<soilbridge::node::SimulatedSoil, soilbridge::node::SimulatedPump> {
    let controller = &config.controller;
    let (soil, pump) = simulated_hardware(
        controller.offset.saturating_add(controller.max_raw) / 2,
        controller.offset,
        controller.max_raw,
    );
    SensorNode::new(config, soil, pump, serial)
}

#[cfg(feature = "serial")]
fn open_device(device: &str, baud_rate: u32) -> NodeResult<SerialLink> {
    Ok(soilbridge::transport::serial::open_serial(device, baud_rate)?)
}

#[cfg(not(feature = "serial"))]
fn open_device(device: &str, _baud_rate: u32) -> NodeResult<SerialLink> {
    Err(soilbridge::error::NodeError::from(ConfigError::InvalidConfig(format!(
        "serial.device '{device}' set but soilbridge was built without the `serial` feature"
    ))))
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl-C, shutting down gracefully...");
}
