use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use comport_bus::{MessageBus, RedisBus, DATA_CHANNEL, DEFAULT_PORT};
use comport_gateway::{Gateway, GatewayConfig};
use comport_transport::{ByteStream, SerialConfig, SerialStream};

use crate::exit::{
    bus_error, gateway_error, transport_error, CliError, CliResult, INTERNAL, USAGE,
};
use crate::output::OutputFormat;

pub mod monitor;
pub mod onewire;
pub mod raw;
pub mod run;
pub mod selftest;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Self-test: bus reachability, serial open and one query.
    Test(TestArgs),
    /// Run the 1-wire probe sequence and print each reply.
    #[command(name = "onewire", alias = "1wire")]
    Onewire(OnewireArgs),
    /// Run the gateway until interrupted.
    Run(RunArgs),
    /// Print envelopes published on the bus.
    Monitor(MonitorArgs),
    /// Publish a command to a running gateway.
    Send(SendArgs),
    /// Send one command straight to the device and print the reply line.
    Raw(RawArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, bus: &BusArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Test(args) => selftest::run(args, bus, format),
        Command::Onewire(args) => onewire::run(args, bus, format),
        Command::Run(args) => run::run(args, bus),
        Command::Monitor(args) => monitor::run(args, bus, format),
        Command::Send(args) => send::run(args, bus, format),
        Command::Raw(args) => raw::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where the message bus lives. Shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct BusArgs {
    /// Redis host.
    #[arg(
        long = "redishost",
        value_name = "HOST",
        env = "COMPORT_REDIS_HOST",
        default_value = "127.0.0.1",
        global = true
    )]
    pub redis_host: String,

    /// Redis port.
    #[arg(
        long = "redisport",
        value_name = "PORT",
        env = "COMPORT_REDIS_PORT",
        default_value_t = DEFAULT_PORT,
        global = true
    )]
    pub redis_port: u16,
}

impl BusArgs {
    /// Bus handle. Connecting is lazy, so this only fails on a bad address.
    pub fn connect(&self) -> CliResult<Arc<dyn MessageBus>> {
        let bus = RedisBus::open(&self.redis_host, self.redis_port)
            .map_err(|err| bus_error("invalid bus address", err))?;
        Ok(Arc::new(bus))
    }
}

/// The serial device a gateway talks to.
#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Serial device path.
    #[arg(long, value_name = "DEV", env = "COMPORT_DEV", default_value = "/dev/arduino")]
    pub dev: String,

    /// Serial baud rate.
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,

    /// Host that collected readings are submitted to. Passed through to
    /// bus consumers; the gateway does not use it.
    #[arg(
        long = "submit-to",
        alias = "submit_to",
        value_name = "HOST",
        default_value = "127.0.0.1"
    )]
    pub submit_to: String,

    /// Host part of the connection signature. Default: outbound IPv4 address.
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Keep the receive buffer after a malformed line instead of
    /// clearing it and sending the recovery command.
    #[arg(long)]
    pub no_resync: bool,
}

impl DeviceArgs {
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            baud_rate: self.baud,
            ..SerialConfig::new(self.dev.clone())
        }
    }

    /// Open the serial port now, so a missing device fails the command
    /// instead of being retried in the background.
    pub fn open_stream(&self) -> CliResult<SerialStream> {
        SerialStream::open_with(self.serial_config())
            .map_err(|err| transport_error("device open failed", err))
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            host: self.host.clone(),
            clear_after_error: !self.no_resync,
            ..GatewayConfig::default()
        }
    }
}

/// Open a gateway over an already opened stream. `start` launches the
/// background loops; otherwise queries run the ingestion cycle inline.
pub fn open_gateway(
    device: &DeviceArgs,
    stream: Box<dyn ByteStream>,
    bus: Arc<dyn MessageBus>,
    start: bool,
) -> CliResult<Gateway> {
    let config = device.gateway_config();
    let gateway = if start {
        Gateway::open(config, stream, bus)
    } else {
        Gateway::open_idle(config, stream, bus)
    };
    gateway.map_err(|err| gateway_error("gateway open failed", err))
}

pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[derive(Args, Debug)]
pub struct TestArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Command sent for the query check.
    #[arg(long, default_value = "I")]
    pub probe: String,
    /// Time to wait for the query reply (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct OnewireArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Probe command; repeat to replace the default sequence.
    #[arg(long = "probe", value_name = "CMD")]
    pub probes: Vec<String>,
    /// Time to wait for each reply (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Interval between ingestion statistics log lines (e.g. 60s).
    #[arg(long, default_value = "60s")]
    pub stats_interval: String,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Channel to subscribe to.
    #[arg(long, default_value = DATA_CHANNEL)]
    pub channel: String,
    /// Only print envelopes from this signature.
    #[arg(long, value_name = "SIGNATURE")]
    pub from: Option<String>,
    /// Exit after printing N envelopes.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Command text, e.g. `I`.
    pub command: String,
    /// Target gateway signature (`host:device`). Default: this host and --dev.
    #[arg(long, value_name = "SIGNATURE")]
    pub to: Option<String>,
    /// Device path used to build the default signature.
    #[arg(long, value_name = "DEV", env = "COMPORT_DEV", default_value = "/dev/arduino")]
    pub dev: String,
    /// Host part of the default signature. Default: outbound IPv4 address.
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,
    /// Wait for the gateway to store the reply and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct RawArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Command text sent to the device.
    pub command: String,
    /// Send the command without the trailing newline.
    #[arg(long)]
    pub no_newline: bool,
    /// Time to wait for a reply line (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_zero_and_garbage() {
        assert_eq!(parse_duration("0s").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("").unwrap_err().code, USAGE);
        assert_eq!(parse_duration("soon").unwrap_err().code, USAGE);
    }

    #[test]
    fn device_args_build_configs() {
        let device = DeviceArgs {
            dev: "/dev/ttyUSB3".to_string(),
            baud: 9600,
            submit_to: "10.0.0.2".to_string(),
            host: Some("10.0.0.7".to_string()),
            no_resync: true,
        };
        let serial = device.serial_config();
        assert_eq!(serial.path, "/dev/ttyUSB3");
        assert_eq!(serial.baud_rate, 9600);

        let config = device.gateway_config();
        assert_eq!(config.host.as_deref(), Some("10.0.0.7"));
        assert!(!config.clear_after_error);
        assert_eq!(config.query_timeout, Duration::from_secs(2));
    }
}
