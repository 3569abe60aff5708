//! Tracker CLI
//!
//! Command-line interface for the device location tracking service.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracker::registration::Registration;
use tracker::{load_config, Config};

#[derive(Parser)]
#[command(name = "tracker")]
#[command(about = "Device location tracking service")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control API port (overrides config file)
    #[arg(long)]
    control_port: Option<u16>,

    /// Polling interval in seconds (overrides config file)
    #[arg(long)]
    polling_interval: Option<u64>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: Level,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the service (default)
    Run,
    /// List registered devices
    Devices,
    /// Register a device with the backend
    Register {
        #[arg(long)]
        device_name: String,
        #[arg(long)]
        device_code: String,
        #[arg(long)]
        nickname: String,
        #[arg(long)]
        customer_id: Option<String>,
    },
    /// Refresh one device and print the reconciled result
    Refresh { device: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    tracing::debug!(
        "Parsed command line arguments: config={:?}, control_port={:?}, polling_interval={:?}, log_level={:?}",
        args.config,
        args.control_port,
        args.polling_interval,
        args.log_level
    );

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        Config::default()
    };

    config.resolve_secrets()?;

    if let Some(control_port) = args.control_port {
        config.control.port = control_port;
    }
    if let Some(polling_interval) = args.polling_interval {
        config.sync.polling_interval_seconds = polling_interval;
    }
    config.validate()?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            tracing::info!("Starting tracker service");
            tracker::run(config).await?;
        }
        Command::Devices => {
            let sync = one_shot(&config)?;
            for device in sync.load_devices().await? {
                println!("{}\t{}", device.id, device.display_label());
            }
        }
        Command::Register {
            device_name,
            device_code,
            nickname,
            customer_id,
        } => {
            let registration =
                Registration::new(&device_name, &device_code, customer_id, &nickname)?;
            let sync = one_shot(&config)?;
            sync.register_device(registration).await?;
            println!("Device registered successfully!");
        }
        Command::Refresh { device } => {
            let sync = one_shot(&config)?;
            sync.load_devices().await?;
            let entry = sync.entry(&device).await.ok_or_else(|| {
                tracker::TrackerError::NotFound(format!("Unknown device '{}'", device))
            })?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
    }

    Ok(())
}

fn one_shot(config: &Config) -> tracker::Result<tracker::Synchronizer> {
    let state = tracker::state::new_state_handle(config.control.history_size);
    tracker::build_synchronizer(config, state)
}
