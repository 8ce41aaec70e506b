use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use comport_bus::BusPayload;
use comport_frame::Envelope;
use tracing::{info, warn};

use crate::cmd::{install_ctrlc_handler, BusArgs, MonitorArgs};
use crate::exit::{bus_error, CliResult, SUCCESS};
use crate::output::{print_envelope, OutputFormat};

const POLL: Duration = Duration::from_millis(250);

pub fn run(args: MonitorArgs, bus_args: &BusArgs, format: OutputFormat) -> CliResult<i32> {
    let bus = bus_args.connect()?;
    bus.ping().map_err(|err| bus_error("bus unreachable", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    info!(channel = %args.channel, "monitoring");

    let mut printed = 0usize;
    bus.listen(&args.channel, POLL, &mut |event| {
        if !running.load(Ordering::SeqCst) {
            return ControlFlow::Break(());
        }
        let Some(payload) = event else {
            return ControlFlow::Continue(());
        };
        match payload {
            BusPayload::Text(text) => {
                if let Some(envelope) = accept(&text, args.from.as_deref()) {
                    print_envelope(&envelope, format);
                    printed = printed.saturating_add(1);
                }
            }
            BusPayload::Unsubscribe => return ControlFlow::Break(()),
            BusPayload::Binary(bytes) => warn!(len = bytes.len(), "skipping binary payload"),
        }
        match args.count {
            Some(count) if printed >= count => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    })
    .map_err(|err| bus_error("subscription failed", err))?;

    Ok(SUCCESS)
}

/// Decode a payload, keeping it only when it comes from `from`.
fn accept(text: &str, from: Option<&str>) -> Option<Envelope> {
    let envelope = match Envelope::from_json(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(error = %err, "skipping payload that is not an envelope");
            return None;
        }
    };
    match from {
        Some(from) if envelope.from != from => None,
        _ => Some(envelope),
    }
}
