use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::cmd::{install_ctrlc_handler, open_gateway, parse_duration, BusArgs, RunArgs};
use crate::exit::{CliResult, SUCCESS};

const TICK: Duration = Duration::from_millis(200);

pub fn run(args: RunArgs, bus_args: &BusArgs) -> CliResult<i32> {
    let stats_interval = parse_duration(&args.stats_interval)?;
    let stream = args.device.open_stream()?;
    let bus = bus_args.connect()?;
    let gateway = open_gateway(&args.device, Box::new(stream), bus, true)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;
    info!(
        signature = %gateway.signature(),
        registered = gateway.is_registered(),
        submit_to = %args.device.submit_to,
        "gateway running, press Ctrl-C to stop"
    );

    let mut last_report = Instant::now();
    while running.load(Ordering::SeqCst) {
        thread::sleep(TICK);
        if last_report.elapsed() >= stats_interval {
            let stats = gateway.stats();
            info!(
                frames = stats.frames,
                malformed = stats.malformed,
                decode_errors = stats.decode_errors,
                recoveries = stats.recoveries,
                bytes = stats.bytes,
                relaying = gateway.is_relaying(),
                "ingest stats"
            );
            last_report = Instant::now();
        }
    }

    info!(signature = %gateway.signature(), "shutting down");
    gateway.close();
    Ok(SUCCESS)
}
