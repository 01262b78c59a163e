//! Aircon Bridge - Main Entry Point

use aircon_bridge::config::BridgeConfig;
use aircon_bridge::error::{BridgeError, BridgeResult};
use aircon_bridge::gateway::AirconGateway;
use aircon_bridge::observability::{init_logging, LogSettings};
use aircon_bridge::Bridge;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// MQTT bridge for networked aircon inverters
#[derive(Parser)]
#[command(name = "aircon-bridge")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging; repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge until SIGINT or SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Print the parsed configuration
        #[arg(long)]
        show: bool,
    },
    /// Query one unit and print its state
    Status { address: String },
    /// Print the airconId and MAC address of a unit
    Info { address: String },
    /// Register the configured operator id on a unit
    Register { address: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = load_configuration(cli.config.as_deref());

    let settings = LogSettings::from_env().with_verbosity(cli.verbose);
    let logging_section = config.as_ref().ok().and_then(|c| c.logging.as_ref());
    let _log_guard = match init_logging(&settings, logging_section) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_bridge(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Status { address } => handle_status_command(&config, &address).await,
        Commands::Info { address } => handle_info_command(&config, &address).await,
        Commands::Register { address } => handle_register_command(&config, &address).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(explicit: Option<&Path>) -> BridgeResult<BridgeConfig> {
    let path = BridgeConfig::locate(explicit)?;
    Ok(BridgeConfig::load_from_file(&path)?)
}

async fn run_bridge(config: BridgeConfig) -> BridgeResult<()> {
    info!("Starting aircon bridge v{}", env!("CARGO_PKG_VERSION"));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
        shutdown_tx.send_replace(true);
    });

    let bridge = Bridge::from_config(config)?;
    bridge.run(shutdown_rx).await
}

fn handle_config_command(config: &BridgeConfig, show: bool) -> BridgeResult<()> {
    println!("Configuration is valid ({} inverters)", config.inverters.len());
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| BridgeError::internal(format!("cannot render configuration: {e}")))?;
        println!("{rendered}");
    }
    Ok(())
}

async fn handle_status_command(config: &BridgeConfig, address: &str) -> BridgeResult<()> {
    let gateway = AirconGateway::new(&config.gateway)?;
    let status = gateway.get_status(address).await?;
    let frame = &status.frame;

    let report = json!({
        "airconId": status.aircon_id,
        "attributes": frame.to_attribute_set(),
        "modelNo": frame.model_no,
        "errorCode": frame.error_code,
    });
    print_json(&report)
}

async fn handle_info_command(config: &BridgeConfig, address: &str) -> BridgeResult<()> {
    let gateway = AirconGateway::new(&config.gateway)?;
    let info = gateway.device_info(address).await?;
    print_json(&info)
}

async fn handle_register_command(config: &BridgeConfig, address: &str) -> BridgeResult<()> {
    let gateway = AirconGateway::new(&config.gateway)?;
    let info = gateway.register(address).await?;
    println!(
        "Registered operator {} with unit {} ({})",
        config.gateway.operator_id, info.aircon_id, info.mac_address
    );
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> BridgeResult<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| BridgeError::internal(format!("cannot render output: {e}")))?;
    println!("{rendered}");
    Ok(())
}
