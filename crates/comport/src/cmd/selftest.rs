use std::sync::Arc;
use std::time::Duration;

use comport_bus::MessageBus;
use comport_gateway::QueryOptions;
use comport_transport::SerialStream;
use serde::Serialize;

use crate::cmd::{open_gateway, parse_duration, BusArgs, TestArgs};
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct TestOutput {
    device: String,
    signature: Option<String>,
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(args: TestArgs, bus_args: &BusArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let bus = bus_args.connect()?;

    let mut checks = vec![bus_check(bus.as_ref(), bus_args)];
    let mut signature = None;

    match args.device.open_stream() {
        Ok(stream) => {
            checks.push(CheckResult::new(
                "serial_open",
                CheckStatus::Pass,
                format!("{} at {} baud", args.device.dev, args.device.baud),
            ));
            let (sig, gateway_checks) = gateway_checks(&args, stream, bus, timeout);
            signature = sig;
            checks.extend(gateway_checks);
        }
        Err(err) => {
            checks.push(CheckResult::new("serial_open", CheckStatus::Fail, err.message));
            checks.push(CheckResult::new(
                "device_query",
                CheckStatus::Skip,
                "serial port not available",
            ));
        }
    }
    checks.push(compiled_features_check());

    let has_fail = checks.iter().any(|c| c.status == CheckStatus::Fail);
    let output = TestOutput {
        device: args.device.dev.clone(),
        signature,
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };
    print_report(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn bus_check(bus: &dyn MessageBus, args: &BusArgs) -> CheckResult {
    let address = format!("{}:{}", args.redis_host, args.redis_port);
    match bus.ping() {
        Ok(()) => CheckResult::new("bus_reachable", CheckStatus::Pass, address),
        Err(err) => {
            CheckResult::new("bus_reachable", CheckStatus::Fail, format!("{address}: {err}"))
        }
    }
}

/// Open an idle gateway on the device and run one inline query.
fn gateway_checks(
    args: &TestArgs,
    stream: SerialStream,
    bus: Arc<dyn MessageBus>,
    timeout: Duration,
) -> (Option<String>, Vec<CheckResult>) {
    let gateway = match open_gateway(&args.device, Box::new(stream), bus, false) {
        Ok(gateway) => gateway,
        Err(err) => {
            let check = CheckResult::new("device_query", CheckStatus::Fail, err.message);
            return (None, vec![check]);
        }
    };

    let mut checks = Vec::new();
    if gateway.is_registered() {
        checks.push(CheckResult::new(
            "presence",
            CheckStatus::Pass,
            format!("registered in {}", gateway.config().presence_set),
        ));
    } else {
        checks.push(CheckResult::new("presence", CheckStatus::Skip, "bus unavailable"));
    }

    let options = QueryOptions::from_config(gateway.config()).timeout(timeout);
    let outcome = gateway.query(&args.probe, &options);
    let check = match (&outcome.envelope, outcome.success) {
        (Some(envelope), true) => {
            let sequence = envelope
                .frame()
                .map_or_else(|| "-".to_string(), |frame| frame.sequence.to_string());
            CheckResult::new(
                "device_query",
                CheckStatus::Pass,
                format!(
                    "{} answered as <{sequence}> in {}ms",
                    args.probe,
                    outcome.elapsed.as_millis()
                ),
            )
        }
        _ if gateway.stats().frames > 0 => CheckResult::new(
            "device_query",
            CheckStatus::Warn,
            format!("{} got no matching reply, but frames are arriving", args.probe),
        ),
        _ => CheckResult::new(
            "device_query",
            CheckStatus::Fail,
            format!("no reply to {} within {timeout:?}", args.probe),
        ),
    };
    checks.push(check);

    let stats = gateway.stats();
    checks.push(CheckResult::new(
        "line_health",
        if stats.malformed > 0 {
            CheckStatus::Warn
        } else {
            CheckStatus::Info
        },
        format!(
            "{} frames, {} malformed, {} decode errors",
            stats.frames, stats.malformed, stats.decode_errors
        ),
    ));

    let signature = gateway.signature().to_string();
    gateway.close();
    (Some(signature), checks)
}

fn print_report(output: &TestOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("comport test {}\n", output.device);
            if let Some(signature) = &output.signature {
                println!("  signature: {signature}\n");
            }
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<18} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Warn => "WARN",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

fn compiled_features_check() -> CheckResult {
    let mut features = Vec::new();
    if cfg!(feature = "serial") {
        features.push("serial");
    }
    if cfg!(feature = "redis") {
        features.push("redis");
    }
    if cfg!(feature = "cli") {
        features.push("cli");
    }

    CheckResult::new("compiled_features", CheckStatus::Info, features.join(", "))
}
