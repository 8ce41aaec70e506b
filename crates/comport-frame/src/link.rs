use bytes::BytesMut;
use comport_transport::{ByteStream, Result};
use tracing::debug;

use crate::codec::extract_line;
use crate::writer::{send_command, SendStatus};

/// Bare line-oriented link to a device: no bus, no wrapper decoding.
///
/// Used for probing firmware by hand. Bytes that arrive after the first
/// complete line stay buffered for the next [`LineLink::read_line`] call.
#[derive(Debug)]
pub struct LineLink<S: ByteStream> {
    stream: S,
    buf: BytesMut,
}

impl<S: ByteStream> LineLink<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    /// Send a command, appending the terminator when asked.
    pub fn send(&mut self, command: &[u8], append_terminator: bool) -> SendStatus {
        send_command(&mut self.stream, command, append_terminator)
    }

    /// Drain the bytes the device has buffered and return the first
    /// complete line, or an empty string when no CRLF has arrived yet.
    pub fn read_line(&mut self) -> Result<String> {
        self.stream.ensure_open()?;
        let available = self.stream.bytes_available()?;
        if available > 0 {
            let chunk = self.stream.read(available)?;
            self.buf.extend_from_slice(&chunk);
        }
        let line = extract_line(&mut self.buf).unwrap_or_default();
        debug!(device = self.stream.name(), line = %line, "raw line");
        Ok(line)
    }

    /// Bytes received but not yet returned as a line.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use comport_transport::MemoryStream;

    use super::*;

    #[test]
    fn returns_first_line_only() {
        let (stream, device) = MemoryStream::new("mem");
        let mut link = LineLink::new(stream);
        device.push("<1>{\"cmd\":\"a\"}</1>\r\nsecond\r\npart");

        assert_eq!(link.read_line().unwrap(), "<1>{\"cmd\":\"a\"}</1>");
        assert_eq!(link.read_line().unwrap(), "second");
        assert_eq!(link.read_line().unwrap(), "");
        assert_eq!(link.pending(), b"part");
    }

    #[test]
    fn empty_when_nothing_arrived() {
        let (stream, _device) = MemoryStream::new("mem");
        let mut link = LineLink::new(stream);
        assert_eq!(link.read_line().unwrap(), "");
    }

    #[test]
    fn send_uses_terminator_rules() {
        let (stream, device) = MemoryStream::new("mem");
        let mut link = LineLink::new(stream);
        assert_eq!(link.send(b"I", true), SendStatus::Sent);
        assert_eq!(link.send(b"", true), SendStatus::Empty);
        assert_eq!(device.written_text(), "I\n");
    }

    #[test]
    fn read_fails_on_unplugged_device() {
        let (stream, device) = MemoryStream::new("mem");
        device.unplug();
        let mut link = LineLink::new(stream);
        assert!(link.read_line().is_err());
    }
}
