use std::thread;
use std::time::{Duration, Instant};

use comport_bus::MessageBus;
use comport_frame::Envelope;
use comport_gateway::{host_ip, ConnectionSignature};
use tracing::{info, warn};

use crate::cmd::{parse_duration, BusArgs, SendArgs};
use crate::exit::{bus_error, frame_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_envelope, OutputFormat};

const WAIT_POLL: Duration = Duration::from_millis(20);

pub fn run(args: SendArgs, bus_args: &BusArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    if args.command.trim().is_empty() {
        return Err(CliError::new(USAGE, "command must not be empty"));
    }

    let signature = target_signature(&args);
    let read_key = format!("{signature}-read");
    let bus = bus_args.connect()?;

    if args.wait {
        // Drop any earlier reply so the wait only sees this command's.
        bus.delete(&read_key)
            .map_err(|err| bus_error("clearing stored reply failed", err))?;
    }

    let receivers = bus
        .publish(&signature, &args.command)
        .map_err(|err| bus_error("publish failed", err))?;
    if receivers == 0 {
        warn!(channel = %signature, "no gateway is listening on this channel");
    }
    info!(channel = %signature, receivers, command = %args.command, "command published");

    if !args.wait {
        return Ok(SUCCESS);
    }

    let envelope = wait_for_reply(bus.as_ref(), &read_key, wait_timeout)?;
    print_envelope(&envelope, format);
    Ok(SUCCESS)
}

fn target_signature(args: &SendArgs) -> String {
    match &args.to {
        Some(signature) => signature.clone(),
        None => {
            let host = args
                .host
                .clone()
                .unwrap_or_else(|| host_ip().to_string());
            ConnectionSignature::new(host, args.dev.clone()).to_string()
        }
    }
}

/// Poll `key` until the gateway stores a reply or `timeout` passes.
fn wait_for_reply(bus: &dyn MessageBus, key: &str, timeout: Duration) -> CliResult<Envelope> {
    let deadline = Instant::now() + timeout;
    loop {
        let stored = bus
            .get(key)
            .map_err(|err| bus_error("reading reply failed", err))?;
        if let Some(text) = stored {
            return Envelope::from_json(&text)
                .map_err(|err| frame_error("stored reply is not an envelope", err));
        }
        if Instant::now() >= deadline {
            return Err(CliError::new(
                TIMEOUT,
                format!("no reply stored under {key} within {timeout:?}"),
            ));
        }
        thread::sleep(WAIT_POLL);
    }
}
