use std::fmt;

use comport_transport::ByteStream;
use tracing::{debug, warn};

use crate::protocol::terminate_command;

/// Result of handing a command to the device.
///
/// Status codes are part of the gateway's external contract: `0` sent,
/// `1` write failed, `2` device could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The command was written to the device.
    Sent,
    /// The device was open but the write failed.
    WriteFailed,
    /// The device could not be opened.
    PortUnavailable,
    /// The command was empty; nothing happened.
    Empty,
}

impl SendStatus {
    /// Numeric status code.
    pub fn code(self) -> i32 {
        match self {
            SendStatus::Sent | SendStatus::Empty => 0,
            SendStatus::WriteFailed => 1,
            SendStatus::PortUnavailable => 2,
        }
    }

    /// Whether bytes reached the device.
    pub fn is_sent(self) -> bool {
        self == SendStatus::Sent
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SendStatus::Sent => "sent",
            SendStatus::WriteFailed => "write failed",
            SendStatus::PortUnavailable => "port unavailable",
            SendStatus::Empty => "empty command",
        };
        f.write_str(text)
    }
}

/// Prepare a command for the wire.
///
/// Returns `None` for an empty command. With `append_terminator` a missing
/// trailing LF is added; an existing one is kept as is.
pub fn encode_command(command: &[u8], append_terminator: bool) -> Option<Vec<u8>> {
    if command.is_empty() {
        return None;
    }
    if append_terminator {
        Some(terminate_command(command))
    } else {
        Some(command.to_vec())
    }
}

/// Write an already-encoded command line, opening the stream when needed.
///
/// Transport failures are folded into the returned status; they never
/// propagate as errors.
pub fn write_line<S: ByteStream + ?Sized>(stream: &mut S, line: &[u8]) -> SendStatus {
    if let Err(err) = stream.ensure_open() {
        warn!(device = stream.name(), error = %err, "device unavailable");
        return SendStatus::PortUnavailable;
    }
    match stream.write_all(line) {
        Ok(()) => {
            debug!(device = stream.name(), bytes = line.len(), "command written");
            SendStatus::Sent
        }
        Err(err) => {
            warn!(device = stream.name(), error = %err, "command write failed");
            SendStatus::WriteFailed
        }
    }
}

/// Encode and write a command in one step.
pub fn send_command<S: ByteStream + ?Sized>(
    stream: &mut S,
    command: &[u8],
    append_terminator: bool,
) -> SendStatus {
    match encode_command(command, append_terminator) {
        Some(line) => write_line(stream, &line),
        None => SendStatus::Empty,
    }
}

#[cfg(test)]
mod tests {
    use comport_transport::MemoryStream;

    use super::*;

    #[test]
    fn appends_terminator_once() {
        let (mut stream, device) = MemoryStream::new("mem");
        assert_eq!(send_command(&mut stream, b"PING", true), SendStatus::Sent);
        assert_eq!(send_command(&mut stream, b"PING\n", true), SendStatus::Sent);
        assert_eq!(device.written_text(), "PING\nPING\n");
    }

    #[test]
    fn raw_mode_sends_verbatim() {
        let (mut stream, device) = MemoryStream::new("mem");
        send_command(&mut stream, b"AB", false);
        assert_eq!(device.written(), b"AB");
    }

    #[test]
    fn empty_command_is_a_no_op() {
        let (mut stream, device) = MemoryStream::new("mem");
        assert_eq!(send_command(&mut stream, b"", true), SendStatus::Empty);
        assert_eq!(SendStatus::Empty.code(), 0);
        assert!(device.written().is_empty());
    }

    #[test]
    fn reopens_closed_stream() {
        let (mut stream, device) = MemoryStream::new("mem");
        stream.close();
        assert_eq!(send_command(&mut stream, b"X", true), SendStatus::Sent);
        assert!(device.is_open());
    }

    #[test]
    fn unavailable_port_reports_code_2() {
        let (mut stream, device) = MemoryStream::new("mem");
        device.unplug();
        let status = send_command(&mut stream, b"X", true);
        assert_eq!(status, SendStatus::PortUnavailable);
        assert_eq!(status.code(), 2);
    }

    #[test]
    fn failed_write_reports_code_1() {
        let (mut stream, device) = MemoryStream::new("mem");
        device.set_fail_writes(true);
        let status = send_command(&mut stream, b"X", true);
        assert_eq!(status, SendStatus::WriteFailed);
        assert_eq!(status.code(), 1);
    }
}
