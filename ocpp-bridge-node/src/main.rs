//! OCPP Bridge Node - CLI for the telemetry-to-OCPP adapter
//!
//! Presents a charger that only publishes MQTT telemetry to an OCPP 1.6
//! Central System.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (broker on 127.0.0.1:1883, CSMS on ws://0.0.0.0:9000)
//! ocpp-bridge-node
//!
//! # Connect to a specific CSMS
//! ocpp-bridge-node --ws_address csms.local --ws_port 9000 --chargepoint_id garage
//!
//! # Run in the background with debug output
//! ocpp-bridge-node -d --debug --mqtt_user evse --mqtt_pass secret
//! ```

use std::time::Duration;

use clap::Parser;
use ocpp_bridge::telemetry::TopicMap;
use ocpp_bridge::{Adapter, AdapterConfig, MeterReportPolicy};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// EVSE OCPP client bridging MQTT telemetry to a Central System
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// MQTT broker address
    #[arg(long = "mqtt_address", visible_alias = "mqtt-address", default_value = "127.0.0.1")]
    mqtt_address: String,

    /// MQTT broker port
    #[arg(long = "mqtt_port", visible_alias = "mqtt-port", default_value = "1883")]
    mqtt_port: u16,

    /// MQTT username
    #[arg(long = "mqtt_user", visible_alias = "mqtt-user", default_value = "")]
    mqtt_user: String,

    /// MQTT password
    #[arg(long = "mqtt_pass", visible_alias = "mqtt-pass", default_value = "")]
    mqtt_pass: String,

    /// WebSocket server address
    #[arg(long = "ws_address", visible_alias = "ws-address", default_value = "0.0.0.0")]
    ws_address: String,

    /// WebSocket server port
    #[arg(long = "ws_port", visible_alias = "ws-port", default_value = "9000")]
    ws_port: u16,

    /// Path prefix on the WebSocket server, before the charge point ID
    #[arg(long = "ws_path", visible_alias = "ws-path", default_value = "")]
    ws_path: String,

    /// ChargePoint ID for OCPP server
    #[arg(long = "chargepoint_id", visible_alias = "chargepoint-id", default_value = "juicepassproxy")]
    chargepoint_id: String,

    /// Telemetry topic base
    #[arg(long = "topic_base", visible_alias = "topic-base", default_value = ocpp_bridge::telemetry::DEFAULT_TOPIC_BASE)]
    topic_base: String,

    /// Vendor name
    #[arg(long, default_value = "JuiceBox")]
    vendor: String,

    /// Model name
    #[arg(long, default_value = "JuicePass-OCPP")]
    model: String,

    /// Seconds to wait for a response to each request
    #[arg(long = "request_timeout", visible_alias = "request-timeout", default_value = "30")]
    request_timeout: u64,

    /// Seconds before reconnecting after a connection failure
    #[arg(long = "reconnect_delay", visible_alias = "reconnect-delay", default_value = "5")]
    reconnect_delay: u64,

    /// Seconds before reconnecting after BootNotification was not accepted
    #[arg(long = "boot_retry_delay", visible_alias = "boot-retry-delay", default_value = "5")]
    boot_retry_delay: u64,

    /// Report one MeterValues per burst of readings instead of per reading
    #[arg(long)]
    coalesce: bool,

    /// Do not send Heartbeat requests
    #[arg(long = "no_heartbeat", visible_alias = "no-heartbeat")]
    no_heartbeat: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long = "log_level", visible_alias = "log-level", default_value = "info")]
    log_level: String,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    /// Run as a daemon in the background
    #[arg(short, long)]
    daemon: bool,
}

fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    // Setup logging
    let level = if args.debug { "debug" } else { args.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let csms_url = csms_url(&args.ws_address, args.ws_port, &args.ws_path);

    // Print banner
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║           OCPP Bridge Node - MQTT to OCPP 1.6-J              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  ChargePoint: {:<47} ║", truncate(&args.chargepoint_id, 47));
    println!("║  CSMS URL:    {:<47} ║", truncate(&csms_url, 47));
    println!("║  MQTT:        {:<47} ║", truncate(&format!("{}:{}", args.mqtt_address, args.mqtt_port), 47));
    println!("║  Topics:      {:<47} ║", truncate(&args.topic_base, 47));
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    // Build configuration
    let mut config = AdapterConfig::new(&args.chargepoint_id, csms_url)
        .with_vendor(&args.vendor, &args.model)
        .with_mqtt_broker(&args.mqtt_address, args.mqtt_port)
        .with_mqtt_credentials(&args.mqtt_user, &args.mqtt_pass)
        .with_topics(TopicMap::with_base(&args.topic_base))
        .with_request_timeout(Duration::from_secs(args.request_timeout))
        .with_reconnect_delay(Duration::from_secs(args.reconnect_delay))
        .with_boot_retry_delay(Duration::from_secs(args.boot_retry_delay));

    if args.coalesce {
        config = config.with_meter_policy(MeterReportPolicy::Coalesce);
    }
    if args.no_heartbeat {
        config = config.without_heartbeat();
    }

    // Fork before the runtime starts any threads
    if args.daemon {
        daemonize()?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

    info!("Starting OCPP bridge...");
    runtime.block_on(Adapter::new(config).run())
}

#[cfg(unix)]
fn daemonize() -> Result<(), BoxError> {
    use std::fs::File;
    use std::os::fd::AsFd;

    // Keep logging to the terminal we were started from
    let stdout = File::from(std::io::stdout().as_fd().try_clone_to_owned()?);
    let stderr = File::from(std::io::stderr().as_fd().try_clone_to_owned()?);

    daemonize::Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()?;

    info!("Running as daemon, pid {}", std::process::id());
    Ok(())
}

#[cfg(not(unix))]
fn daemonize() -> Result<(), BoxError> {
    tracing::warn!("Daemon mode is only supported on Unix, staying in the foreground");
    Ok(())
}

/// Central System URL without the charge point ID
fn csms_url(address: &str, port: u16, path: &str) -> String {
    let path = path.trim_matches('/');
    if path.is_empty() {
        format!("ws://{}:{}", address, port)
    } else {
        format!("ws://{}:{}/{}", address, port, path)
    }
}

/// Truncate string with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
