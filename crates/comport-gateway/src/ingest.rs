use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::BytesMut;
use comport_bus::MessageBus;
use comport_frame::{DecodedFrame, Envelope, FrameParser, ParseStep};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::control::LoopControl;
use crate::error::Result;
use crate::signature::ConnectionSignature;
use crate::writer::{lock_stream, DeviceWriter, SharedStream};

/// Counters kept by the ingestion loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Bytes read from the device.
    pub bytes: u64,
    /// Lines that matched the wrapper, including decode errors.
    pub frames: u64,
    /// Frames whose body was not valid JSON.
    pub decode_errors: u64,
    /// Lines that failed the wrapper grammar.
    pub malformed: u64,
    /// Recovery commands sent.
    pub recoveries: u64,
}

/// What the ingestion loop last saw, as published to readers.
#[derive(Debug, Clone, Default)]
pub struct BufferSnapshot {
    /// Received text not yet terminated by CRLF.
    pub pending: String,
    /// Last complete line, valid or not.
    pub last_line: String,
    /// Envelope built for the last decoded frame.
    pub last_message: Option<Envelope>,
    pub stats: IngestStats,
}

impl BufferSnapshot {
    /// The last line followed by the unterminated tail.
    pub fn text(&self) -> String {
        format!("{}{}", self.last_line, self.pending)
    }

    /// Whether `token` is visible. The empty token always is.
    pub fn contains(&self, token: &str) -> bool {
        token.is_empty() || self.text().contains(token)
    }
}

/// Owner of the receive buffer.
///
/// Exactly one `Ingestor` exists per gateway. It moves into the ingestion
/// thread while the loop runs and comes back when the thread is joined, so
/// the buffer never has two owners. Everyone else reads the
/// [`BufferSnapshot`] it publishes.
pub struct Ingestor {
    buf: BytesMut,
    parser: FrameParser,
    stream: SharedStream,
    bus: Arc<dyn MessageBus>,
    writer: DeviceWriter,
    signature: String,
    read_key: String,
    data_channel: String,
    recovery_command: String,
    poll_interval: Duration,
    state: Arc<watch::Sender<BufferSnapshot>>,
}

impl Ingestor {
    pub fn new(
        config: &GatewayConfig,
        signature: &ConnectionSignature,
        stream: SharedStream,
        bus: Arc<dyn MessageBus>,
        writer: DeviceWriter,
        state: Arc<watch::Sender<BufferSnapshot>>,
    ) -> Self {
        let origin = signature.to_string();
        Self {
            buf: BytesMut::new(),
            parser: FrameParser::with_config(origin.clone(), config.frame_config()),
            stream,
            bus,
            writer,
            signature: origin,
            read_key: signature.read_key(),
            data_channel: config.data_channel.clone(),
            recovery_command: config.recovery_command.clone(),
            poll_interval: config.poll_interval,
            state,
        }
    }

    /// Run until `control` asks to stop, then hand the ingestor back.
    pub fn run(mut self, control: LoopControl) -> Self {
        info!(signature = %self.signature, "ingestion loop started");
        let mut failing = false;

        while control.is_running() {
            match self.poll_once() {
                Ok(read) => {
                    failing = false;
                    if read == 0 {
                        thread::sleep(self.poll_interval);
                    }
                }
                Err(err) => {
                    if !failing {
                        warn!(signature = %self.signature, error = %err, "device read failed");
                        failing = true;
                    }
                    thread::sleep(self.poll_interval);
                }
            }
        }

        info!(signature = %self.signature, "ingestion loop stopped");
        self
    }

    /// One ingestion cycle: read whatever the device has buffered and
    /// process every complete line. Returns the number of bytes read.
    pub fn poll_once(&mut self) -> Result<usize> {
        let chunk = {
            let mut stream = lock_stream(&self.stream);
            stream.ensure_open()?;
            let read = stream
                .bytes_available()
                .and_then(|available| match available {
                    0 => Ok(Vec::new()),
                    n => stream.read(n),
                });
            match read {
                Ok(chunk) => chunk,
                Err(err) => {
                    // Reopen on the next cycle.
                    stream.close();
                    return Err(err.into());
                }
            }
        };

        if chunk.is_empty() {
            return Ok(0);
        }
        self.buf.extend_from_slice(&chunk);
        self.state.send_modify(|s| s.stats.bytes += chunk.len() as u64);
        self.drain();
        Ok(chunk.len())
    }

    /// Apply the parser until it needs more data.
    pub fn drain(&mut self) {
        loop {
            match self.parser.next_frame(&mut self.buf) {
                ParseStep::NeedMoreData => break,
                ParseStep::Frame(frame) => self.handle_frame(frame),
                ParseStep::Malformed { line } => self.handle_malformed(line),
            }
        }
        let pending = self.pending_text();
        self.state.send_modify(|s| s.pending = pending);
    }

    /// Bytes received but not yet terminated.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Current published state.
    pub fn snapshot(&self) -> BufferSnapshot {
        self.state.borrow().clone()
    }

    fn handle_frame(&mut self, frame: DecodedFrame) {
        let envelope = Envelope::for_frame(self.signature.as_str(), &frame);
        let decode_error = !frame.is_data();

        match envelope.to_json() {
            Ok(json) => {
                if let Err(err) = self.bus.publish(&self.data_channel, &json) {
                    debug!(channel = %self.data_channel, error = %err, "publish failed");
                }
                if let Err(err) = self.bus.set(&self.read_key, &json) {
                    debug!(key = %self.read_key, error = %err, "store failed");
                }
                debug!(sequence = %frame.sequence, decode_error, "frame published");
            }
            Err(err) => {
                warn!(sequence = %frame.sequence, error = %err, "failed to encode envelope");
            }
        }

        // Published after the key is stored: a reader that sees this line
        // in the snapshot also sees its stored reply.
        let pending = self.pending_text();
        self.state.send_modify(move |s| {
            s.last_line = frame.raw;
            s.pending = pending;
            s.last_message = Some(envelope);
            s.stats.frames += 1;
            if decode_error {
                s.stats.decode_errors += 1;
            }
        });
    }

    fn handle_malformed(&mut self, line: String) {
        let clear = self.parser.config().clear_after_error;
        warn!(
            signature = %self.signature,
            line = %line,
            resync = clear,
            "line does not match frame wrapper"
        );
        if clear {
            self.buf.clear();
        }
        let pending = self.pending_text();
        self.state.send_modify(move |s| {
            s.last_line = line;
            s.pending = pending;
            s.stats.malformed += 1;
            if clear {
                s.stats.recoveries += 1;
            }
        });
        if clear {
            let status = self.writer.send(self.recovery_command.as_bytes(), true);
            debug!(status = %status, "recovery command sent");
        }
    }

    fn pending_text(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use comport_bus::MemoryBus;
    use comport_frame::FramePayload;
    use comport_transport::{MemoryStream, MemoryStreamHandle};
    use serde_json::json;

    use super::*;

    const SIG_HOST: &str = "127.0.0.1";
    const SIG_DEV: &str = "/dev/ttyTEST";

    fn ingestor() -> (Ingestor, MemoryStreamHandle, Arc<MemoryBus>) {
        let (stream, device) = MemoryStream::new(SIG_DEV);
        let bus = Arc::new(MemoryBus::new());
        let sig = ConnectionSignature::new(SIG_HOST, SIG_DEV);
        let (state, snapshot) = watch::channel(BufferSnapshot::default());
        let shared: SharedStream = Arc::new(Mutex::new(Box::new(stream)));
        let writer = DeviceWriter::new(Arc::clone(&shared), bus.clone(), &sig, snapshot);
        let ing = Ingestor::new(
            &GatewayConfig::default(),
            &sig,
            shared,
            bus.clone(),
            writer,
            Arc::new(state),
        );
        (ing, device, bus)
    }

    fn read_key() -> String {
        ConnectionSignature::new(SIG_HOST, SIG_DEV).read_key()
    }

    #[test]
    fn publishes_and_stores_decoded_frame() {
        let (mut ing, device, bus) = ingestor();
        device.push("<5>{\"cmd\":\"ok\"}</5>\r\n");

        assert_eq!(ing.poll_once().unwrap(), 21);
        assert!(ing.pending().is_empty());

        let published = bus.published("data");
        assert_eq!(published.len(), 1);
        let env = Envelope::from_json(&published[0]).unwrap();
        assert_eq!(env.from, "127.0.0.1:/dev/ttyTEST");
        let frame = env.frame().unwrap();
        assert_eq!(frame.sequence.value(), Some(5));
        assert_eq!(frame.payload, FramePayload::Data(json!({"cmd": "ok"})));

        assert_eq!(bus.get(&read_key()).unwrap(), Some(published[0].clone()));
        let snap = ing.snapshot();
        assert_eq!(snap.last_line, "<5>{\"cmd\":\"ok\"}</5>");
        assert_eq!(snap.stats.frames, 1);
        assert!(device.written().is_empty());
    }

    #[test]
    fn garbage_triggers_single_recovery() {
        let (mut ing, device, bus) = ingestor();
        device.push("garbage\r\n<1>{\"cmd\":\"x\"}</1>");

        ing.poll_once().unwrap();
        assert!(ing.pending().is_empty());
        assert_eq!(device.written_text(), "Z\n");
        assert!(bus.published("data").is_empty());
        assert_eq!(bus.get(&read_key()).unwrap(), None);

        let stats = ing.snapshot().stats;
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.recoveries, 1);
    }

    #[test]
    fn body_decode_error_is_still_published() {
        let (mut ing, device, bus) = ingestor();
        device.push("<3>{broken</3>\r\n");

        ing.poll_once().unwrap();
        let published = bus.published("data");
        assert_eq!(published.len(), 1);
        let frame = Envelope::from_json(&published[0]).unwrap().frame().unwrap();
        assert_eq!(frame.sequence.value(), Some(3));
        assert!(matches!(frame.payload, FramePayload::DecodeError(_)));
        assert!(device.written().is_empty());
        assert_eq!(ing.snapshot().stats.decode_errors, 1);
    }

    #[test]
    fn oversized_sequence_numbers_are_published_verbatim() {
        let (mut ing, device, bus) = ingestor();
        device.push("<123456789012345678901>\"x\"</123456789012345678901>\r\n");
        device.push("<9223372036854775808>1</9223372036854775808>\r\n");

        ing.poll_once().unwrap();
        assert!(device.written().is_empty());
        assert_eq!(ing.snapshot().stats.malformed, 0);

        let published = bus.published("data");
        assert_eq!(published.len(), 2);
        let first: serde_json::Value = serde_json::from_str(&published[0]).unwrap();
        assert_eq!(first["MSG"]["cmd_number"], "123456789012345678901");
        let second: serde_json::Value = serde_json::from_str(&published[1]).unwrap();
        assert_eq!(second["MSG"]["cmd_number"].as_u64(), Some(9_223_372_036_854_775_808));
    }

    #[test]
    fn partial_line_waits_for_rest() {
        let (mut ing, device, bus) = ingestor();
        device.push("<2>{\"cmd\":");
        ing.poll_once().unwrap();
        assert!(bus.published("data").is_empty());
        assert_eq!(ing.snapshot().pending, "<2>{\"cmd\":");

        device.push("\"t\"}</2>\r\n");
        ing.poll_once().unwrap();
        assert_eq!(bus.published("data").len(), 1);
        assert!(ing.snapshot().pending.is_empty());
    }

    #[test]
    fn several_lines_in_one_chunk() {
        let (mut ing, device, bus) = ingestor();
        device.push("<1>{\"cmd\":\"a\"}</1>\r\n<2>{\"cmd\":\"b\"}</2>\r\n<3>");
        ing.poll_once().unwrap();
        assert_eq!(bus.published("data").len(), 2);
        assert_eq!(ing.pending(), b"<3>");
        assert_eq!(ing.snapshot().last_line, "<2>{\"cmd\":\"b\"}</2>");
    }

    #[test]
    fn nothing_available_reads_nothing() {
        let (mut ing, _device, bus) = ingestor();
        assert_eq!(ing.poll_once().unwrap(), 0);
        assert!(bus.published("data").is_empty());
    }

    #[test]
    fn unplugged_device_is_an_error() {
        let (mut ing, device, _bus) = ingestor();
        device.unplug();
        assert!(ing.poll_once().is_err());
        device.plug_in();
        device.push("<1>{}</1>\r\n");
        assert_eq!(ing.poll_once().unwrap(), 11);
    }

    #[test]
    fn bus_outage_does_not_stop_ingestion() {
        let (mut ing, device, bus) = ingestor();
        bus.set_offline(true);
        device.push("<4>{\"cmd\":\"v\"}</4>\r\n");
        ing.poll_once().unwrap();
        assert_eq!(ing.snapshot().stats.frames, 1);
        assert!(ing.snapshot().last_message.is_some());
    }

    #[test]
    fn snapshot_contains_checks_line_and_tail() {
        let snap = BufferSnapshot {
            pending: "<6>{\"cm".to_string(),
            last_line: "<5>{\"cmd\":\"ok\"}</5>".to_string(),
            ..BufferSnapshot::default()
        };
        assert!(snap.contains(""));
        assert!(snap.contains("<5>{\"cmd\":\""));
        assert!(snap.contains("<6>"));
        assert!(!snap.contains("<7>"));
    }
}
