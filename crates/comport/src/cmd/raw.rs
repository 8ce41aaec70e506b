use std::thread;
use std::time::{Duration, Instant};

use comport_frame::{LineLink, SendStatus};
use comport_transport::ByteStream;

use crate::cmd::{parse_duration, RawArgs};
use crate::exit::{transport_error, CliError, CliResult, SUCCESS, TIMEOUT, TRANSPORT_ERROR, USAGE};
use crate::output::{print_line, OutputFormat};

const READ_POLL: Duration = Duration::from_millis(10);

pub fn run(args: RawArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let stream = args.device.open_stream()?;
    let mut link = LineLink::new(stream);

    let line = exchange(&mut link, &args.command, !args.no_newline, timeout)?;
    print_line(&args.command, &line, format);
    Ok(SUCCESS)
}

/// Send `command` and wait for the first complete reply line.
fn exchange<S: ByteStream>(
    link: &mut LineLink<S>,
    command: &str,
    append_terminator: bool,
    timeout: Duration,
) -> CliResult<String> {
    match link.send(command.as_bytes(), append_terminator) {
        SendStatus::Sent => {}
        SendStatus::Empty => return Err(CliError::new(USAGE, "command must not be empty")),
        status => {
            return Err(CliError::new(
                TRANSPORT_ERROR,
                format!("send failed: {status} ({})", status.code()),
            ))
        }
    }

    let deadline = Instant::now() + timeout;
    loop {
        let line = link
            .read_line()
            .map_err(|err| transport_error("read failed", err))?;
        if !line.is_empty() {
            return Ok(line);
        }
        if Instant::now() >= deadline {
            return Err(CliError::new(
                TIMEOUT,
                format!("no reply line within {timeout:?}"),
            ));
        }
        thread::sleep(READ_POLL);
    }
}
