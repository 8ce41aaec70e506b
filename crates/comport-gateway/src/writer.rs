use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use comport_bus::MessageBus;
use comport_frame::{
    encode_command, next_expected_sequence, write_line, SendStatus, SEQUENCE_UNKNOWN,
};
use comport_transport::ByteStream;
use tokio::sync::watch;
use tracing::debug;

use crate::ingest::BufferSnapshot;
use crate::signature::ConnectionSignature;

/// Device handle shared by the ingestion loop and every writer.
pub type SharedStream = Arc<Mutex<Box<dyn ByteStream>>>;

pub(crate) fn lock_stream(stream: &SharedStream) -> MutexGuard<'_, Box<dyn ByteStream>> {
    stream.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sends command lines to the device and mirrors them to the bus.
///
/// Cloned into the relay and ingestion loops; all clones share the same
/// device handle and command-number cache.
#[derive(Clone)]
pub struct DeviceWriter {
    stream: SharedStream,
    bus: Arc<dyn MessageBus>,
    send_key: String,
    snapshot: watch::Receiver<BufferSnapshot>,
    next_cmd_num: Arc<AtomicI64>,
}

impl DeviceWriter {
    pub fn new(
        stream: SharedStream,
        bus: Arc<dyn MessageBus>,
        signature: &ConnectionSignature,
        snapshot: watch::Receiver<BufferSnapshot>,
    ) -> Self {
        Self {
            stream,
            bus,
            send_key: signature.send_key(),
            snapshot,
            next_cmd_num: Arc::new(AtomicI64::new(SEQUENCE_UNKNOWN)),
        }
    }

    /// Send one command.
    ///
    /// An empty command does nothing and reports [`SendStatus::Empty`].
    /// Otherwise the command is written (opening the device if needed) and
    /// then mirrored to the `-send` key whatever the write outcome.
    pub fn send(&self, command: &[u8], append_terminator: bool) -> SendStatus {
        let Some(line) = encode_command(command, append_terminator) else {
            return SendStatus::Empty;
        };
        self.track_sequence();

        let status = {
            let mut stream = lock_stream(&self.stream);
            write_line(&mut *stream, &line)
        };

        let text = String::from_utf8_lossy(&line);
        debug!(command = %text.trim_end(), status = %status, "send");
        if let Err(err) = self.bus.set(&self.send_key, &text) {
            debug!(key = %self.send_key, error = %err, "send mirror failed");
        }
        status
    }

    /// Number the device will assign to the next command, when known.
    pub fn next_cmd_num(&self) -> Option<u64> {
        u64::try_from(self.next_cmd_num.load(Ordering::SeqCst)).ok()
    }

    fn track_sequence(&self) {
        let text = self.snapshot.borrow().text();
        if let Some(seq) = next_expected_sequence(&text) {
            let next = i64::try_from(seq.saturating_add(1)).unwrap_or(i64::MAX);
            self.next_cmd_num.store(next, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use comport_bus::MemoryBus;
    use comport_transport::{MemoryStream, MemoryStreamHandle};

    use super::*;

    struct Fixture {
        writer: DeviceWriter,
        device: MemoryStreamHandle,
        bus: Arc<MemoryBus>,
        state: watch::Sender<BufferSnapshot>,
        sig: ConnectionSignature,
    }

    fn fixture() -> Fixture {
        let (stream, device) = MemoryStream::new("/dev/ttyTEST");
        let bus = Arc::new(MemoryBus::new());
        let sig = ConnectionSignature::new("127.0.0.1", "/dev/ttyTEST");
        let (state, snapshot) = watch::channel(BufferSnapshot::default());
        let shared: SharedStream = Arc::new(Mutex::new(Box::new(stream)));
        let writer = DeviceWriter::new(shared, bus.clone(), &sig, snapshot);
        Fixture {
            writer,
            device,
            bus,
            state,
            sig,
        }
    }

    #[test]
    fn appends_terminator_and_mirrors() {
        let fx = fixture();
        assert_eq!(fx.writer.send(b"PING", true), SendStatus::Sent);
        assert_eq!(fx.device.written_text(), "PING\n");
        assert_eq!(
            fx.bus.get(&fx.sig.send_key()).unwrap().as_deref(),
            Some("PING\n")
        );

        assert_eq!(fx.writer.send(b"PING\n", true), SendStatus::Sent);
        assert_eq!(fx.device.written_text(), "PING\nPING\n");
    }

    #[test]
    fn empty_command_has_no_side_effects() {
        let fx = fixture();
        assert_eq!(fx.writer.send(b"", true), SendStatus::Empty);
        assert!(fx.device.written().is_empty());
        assert_eq!(fx.bus.get(&fx.sig.send_key()).unwrap(), None);
    }

    #[test]
    fn mirrors_even_when_port_unavailable() {
        let fx = fixture();
        fx.device.unplug();
        assert_eq!(fx.writer.send(b"T", true), SendStatus::PortUnavailable);
        assert_eq!(fx.bus.get(&fx.sig.send_key()).unwrap().as_deref(), Some("T\n"));
    }

    #[test]
    fn write_failure_reports_code_1() {
        let fx = fixture();
        fx.device.set_fail_writes(true);
        assert_eq!(fx.writer.send(b"T", true).code(), 1);
    }

    #[test]
    fn bus_outage_does_not_block_send() {
        let fx = fixture();
        fx.bus.set_offline(true);
        assert_eq!(fx.writer.send(b"T", true), SendStatus::Sent);
        assert_eq!(fx.device.written_text(), "T\n");
    }

    #[test]
    fn tracks_next_command_number() {
        let fx = fixture();
        assert_eq!(fx.writer.next_cmd_num(), None);
        fx.state.send_modify(|s| s.last_line = r#"<7>{"cmd":"temp"}</7>"#.to_string());
        fx.writer.send(b"T", true);
        assert_eq!(fx.writer.next_cmd_num(), Some(8));
    }
}
