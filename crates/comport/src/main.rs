mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::{BusArgs, Command};
use crate::logging::{init_logging, BusLogLayer, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "comport",
    version,
    about = "Gateway between AVR serial firmware and a Redis message bus"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Also publish log records on the bus channel `log:<NAME>`.
    #[arg(
        long,
        value_name = "NAME",
        num_args = 0..=1,
        default_missing_value = "comport",
        global = true
    )]
    bus_log: Option<String>,

    #[command(flatten)]
    bus: BusArgs,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();

    let bus_log = match &cli.bus_log {
        Some(name) => match cli.bus.connect() {
            Ok(bus) => Some(BusLogLayer::new(bus, name)),
            Err(err) => {
                eprintln!("warning: bus logging disabled: {err}");
                None
            }
        },
        None => None,
    };
    init_logging(cli.log_format, cli.log_level, bus_log);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, &cli.bus, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
