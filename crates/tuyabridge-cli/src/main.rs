//! `tuyabridge` – exposes Tuya LAN devices on MQTT.
//!
//! 1. Loads `tuyabridge.toml` (defaults when absent) and the devices file.
//! 2. Builds one protocol session per accepted device.
//! 3. Connects to the broker, subscribes every `{base}/{identifier}/set` and
//!    starts one poll worker per device publishing `{base}/{identifier}/status`.
//! 4. Ctrl-C (or SIGTERM) disconnects cleanly and exits.

mod config;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tokio::sync::Notify;
use tracing::{error, warn};

use tuyabridge_core::Bridge;
use tuyabridge_device::{DeviceSession, SimDevice, SocketTuning, TuyaDevice, WriteCapability};
use tuyabridge_types::{BridgeError, DeviceConfig, DpsValue};

#[derive(Debug, Parser)]
#[command(name = "tuyabridge", version, about = "Bridge Tuya LAN devices to an MQTT broker")]
struct Args {
    /// Bridge settings file.
    #[arg(long, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Devices file; overrides `devices_file` from the settings.
    #[arg(long)]
    devices: Option<PathBuf>,

    /// Topic prefix; overrides `mqtt.base_topic`.
    #[arg(long)]
    base_topic: Option<String>,

    /// Use in-memory simulated devices instead of the network.
    #[arg(long)]
    simulate: bool,

    /// Log the topic table and exit without connecting.
    #[arg(long)]
    print_topics: bool,
}

fn main() {
    let telemetry = telemetry::init("tuyabridge");
    let args = Args::parse();

    print_banner();

    let code = match run(args) {
        Ok(()) => 0,
        Err(e) => {
            error!("{e}");
            1
        }
    };
    drop(telemetry);
    std::process::exit(code);
}

fn run(args: Args) -> Result<(), BridgeError> {
    let mut cfg = config::resolve(&args.config)?;
    if let Some(devices) = args.devices {
        cfg.devices_file = devices;
    }
    if let Some(base) = args.base_topic {
        cfg.mqtt.base_topic = base;
        cfg.validate()?;
    }

    let devices = config::load_devices(&cfg.devices_file)?;
    let bridge = if args.simulate {
        Bridge::build(&devices, cfg.topic_scheme(), open_simulated)
    } else {
        Bridge::build(&devices, cfg.topic_scheme(), open_network)
    };
    bridge.log_topic_table();

    if args.print_topics {
        return Ok(());
    }

    let shutdown = install_shutdown_handler();
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| BridgeError::Config(format!("cannot start async runtime: {e}")))?;

    let settings = cfg.mqtt_settings();
    runtime.block_on(bridge.run(&settings, cfg.poll_timing(), async move {
        shutdown.notified().await;
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

fn capability_for(cfg: &DeviceConfig) -> WriteCapability {
    if cfg.bulk_write {
        WriteCapability::Bulk
    } else {
        WriteCapability::SingleOnly
    }
}

fn open_network(cfg: &DeviceConfig) -> Result<Arc<dyn DeviceSession>, BridgeError> {
    let device = TuyaDevice::from_config(cfg, SocketTuning::default())?;
    Ok(Arc::new(device))
}

fn open_simulated(cfg: &DeviceConfig) -> Result<Arc<dyn DeviceSession>, BridgeError> {
    let device = SimDevice::new(cfg.id.clone(), capability_for(cfg)).with_dp(1, DpsValue::Bool(false));
    Ok(Arc::new(device))
}

// ─────────────────────────────────────────────────────────────────────────────
// Shutdown
// ─────────────────────────────────────────────────────────────────────────────

fn install_shutdown_handler() -> Arc<Notify> {
    let shutdown = Arc::new(Notify::new());
    let notify = shutdown.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Interrupt received – shutting down …".yellow().bold());
        // notify_one stores a permit if the runtime is not waiting yet.
        notify.notify_one();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }
    shutdown
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"  _                    _          _     _            "#.bold().cyan());
    println!("{}", r#" | |_ _  _ _  _ __ _  | |__ _ _  (_)__| |__ _ ___   "#.bold().cyan());
    println!("{}", r#" |  _| || | || / _` | | '_ \ '_| | / _` / _` / -_)  "#.bold().cyan());
    println!("{}", r#"  \__|\_,_|\_, \__,_| |_.__/_|   |_\__,_\__, \___|  "#.bold().cyan());
    println!("{}", r#"           |__/                         |___/        "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "tuyabridge".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Tuya LAN devices on MQTT");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_flags() {
        let args = Args::try_parse_from([
            "tuyabridge",
            "--config",
            "/etc/tuyabridge.toml",
            "--devices",
            "devs.json",
            "--base-topic",
            "home/tuya",
            "--simulate",
            "--print-topics",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/tuyabridge.toml"));
        assert_eq!(args.devices, Some(PathBuf::from("devs.json")));
        assert_eq!(args.base_topic.as_deref(), Some("home/tuya"));
        assert!(args.simulate);
        assert!(args.print_topics);
    }

    #[test]
    fn args_defaults() {
        let args = Args::try_parse_from(["tuyabridge"]).unwrap();
        assert_eq!(args.config, PathBuf::from("tuyabridge.toml"));
        assert!(args.devices.is_none());
        assert!(!args.simulate);
    }

    #[test]
    fn simulated_sessions_follow_bulk_flag() {
        let mut cfg = DeviceConfig::new("bf01", "10.0.0.2", "0123456789abcdef", "Lamp");
        assert_eq!(open_simulated(&cfg).unwrap().write_capability(), WriteCapability::Bulk);
        cfg.bulk_write = false;
        assert_eq!(open_simulated(&cfg).unwrap().write_capability(), WriteCapability::SingleOnly);
    }

    #[test]
    fn network_session_rejects_bad_key() {
        let cfg = DeviceConfig::new("bf01", "10.0.0.2", "short", "Lamp");
        assert!(matches!(open_network(&cfg), Err(BridgeError::Config(_))));
    }

    #[test]
    fn print_topics_runs_without_broker() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let devices = dir.path().join("devices.json");
        std::fs::write(
            &devices,
            r#"[{"id": "bf01", "ip": "10.0.0.2", "key": "0123456789abcdef", "name": "Kitchen Lamp"}]"#,
        )
        .expect("write");

        let args = Args {
            config: dir.path().join("absent.toml"),
            devices: Some(devices),
            base_topic: Some("test/tuya".to_string()),
            simulate: true,
            print_topics: true,
        };
        assert!(run(args).is_ok());
    }
}
