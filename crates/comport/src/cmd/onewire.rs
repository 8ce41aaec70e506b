use comport_gateway::QueryOptions;
use tracing::{info, warn};

use crate::cmd::{open_gateway, parse_duration, BusArgs, OnewireArgs};
use crate::exit::{CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_outcome, OutputFormat};

/// Identify the firmware, then read every sensor on the 1-wire bus.
pub const DEFAULT_PROBES: &[&str] = &["I", "W"];

pub fn run(args: OnewireArgs, bus_args: &BusArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let probes = probe_sequence(args.probes);

    let stream = args.device.open_stream()?;
    let bus = bus_args.connect()?;
    let gateway = open_gateway(&args.device, Box::new(stream), bus, true)?;
    info!(signature = %gateway.signature(), probes = probes.len(), "running 1-wire probe");

    let options = QueryOptions::from_config(gateway.config()).timeout(timeout);
    let mut unanswered = 0usize;
    for probe in &probes {
        let outcome = gateway.query(probe, &options);
        if !outcome.success {
            warn!(command = %probe, "probe got no reply");
            unanswered += 1;
        }
        print_outcome(probe, &outcome, format);
    }
    gateway.close();

    if unanswered == 0 {
        Ok(SUCCESS)
    } else {
        Ok(TIMEOUT)
    }
}

fn probe_sequence(requested: Vec<String>) -> Vec<String> {
    if requested.is_empty() {
        DEFAULT_PROBES.iter().map(ToString::to_string).collect()
    } else {
        requested
    }
}
