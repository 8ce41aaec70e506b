use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use comport_bus::MessageBus;
use comport_frame::{resolve_wait_token, Envelope, SendStatus};
use comport_transport::ByteStream;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::control::LoopControl;
use crate::error::{GatewayError, Result};
use crate::ingest::{BufferSnapshot, IngestStats, Ingestor};
use crate::query::{QueryOptions, QueryOutcome};
use crate::relay::CommandRelay;
use crate::signature::ConnectionSignature;
use crate::writer::{lock_stream, DeviceWriter, SharedStream};

/// Interval between checks of the stored reply while a query waits.
const WAIT_POLL: Duration = Duration::from_millis(10);

enum IngestSlot {
    Idle(Box<Ingestor>),
    Running(JoinHandle<Ingestor>),
    Lost,
}

/// One device bridged onto the bus.
///
/// Owns the byte stream and both background loops. Registers its signature
/// in the presence set while open. All methods take `&self`, so a gateway
/// can be shared across threads behind an `Arc`.
pub struct Gateway {
    config: GatewayConfig,
    signature: ConnectionSignature,
    bus: Arc<dyn MessageBus>,
    stream: SharedStream,
    writer: DeviceWriter,
    state: Arc<watch::Sender<BufferSnapshot>>,
    snapshot: watch::Receiver<BufferSnapshot>,
    alive: Arc<AtomicBool>,
    reader_alive: Arc<AtomicBool>,
    relay_alive: Arc<AtomicBool>,
    ingest: Mutex<IngestSlot>,
    relay: Mutex<Option<JoinHandle<()>>>,
    registered: AtomicBool,
    closed: AtomicBool,
}

impl Gateway {
    /// Open a gateway and start both background loops.
    ///
    /// An unreachable bus only disables presence registration; the device
    /// is still ingested. A device that cannot be opened yet is retried by
    /// the ingestion loop.
    pub fn open(
        config: GatewayConfig,
        stream: Box<dyn ByteStream>,
        bus: Arc<dyn MessageBus>,
    ) -> Result<Self> {
        let gateway = Self::open_idle(config, stream, bus)?;
        gateway.start()?;
        Ok(gateway)
    }

    /// Open a gateway without starting its loops.
    ///
    /// Reads and queries then run the ingestion cycle inline.
    pub fn open_idle(
        config: GatewayConfig,
        mut stream: Box<dyn ByteStream>,
        bus: Arc<dyn MessageBus>,
    ) -> Result<Self> {
        let signature = match &config.host {
            Some(host) => ConnectionSignature::new(host.clone(), stream.name()),
            None => ConnectionSignature::discover(stream.name()),
        };
        info!(signature = %signature, "opening gateway");

        if let Err(err) = stream.ensure_open() {
            warn!(signature = %signature, error = %err, "device not available yet");
        }

        let stream: SharedStream = Arc::new(Mutex::new(stream));
        let (state, snapshot) = watch::channel(BufferSnapshot::default());
        let state = Arc::new(state);
        let writer = DeviceWriter::new(
            Arc::clone(&stream),
            Arc::clone(&bus),
            &signature,
            snapshot.clone(),
        );
        let ingestor = Ingestor::new(
            &config,
            &signature,
            Arc::clone(&stream),
            Arc::clone(&bus),
            writer.clone(),
            Arc::clone(&state),
        );

        let gateway = Self {
            config,
            signature,
            bus,
            stream,
            writer,
            state,
            snapshot,
            alive: Arc::new(AtomicBool::new(true)),
            reader_alive: Arc::new(AtomicBool::new(false)),
            relay_alive: Arc::new(AtomicBool::new(false)),
            ingest: Mutex::new(IngestSlot::Idle(Box::new(ingestor))),
            relay: Mutex::new(None),
            registered: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };
        gateway.register();
        Ok(gateway)
    }

    /// Start the ingestion and relay loops. Starting a running loop is a
    /// no-op.
    pub fn start(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            warn!(signature = %self.signature, "start ignored, gateway is closed");
            return Ok(());
        }
        self.alive.store(true, Ordering::SeqCst);
        self.start_reader()?;
        self.start_relay()
    }

    /// Stop both loops and wait for them to finish.
    ///
    /// The gateway stays usable: reads and queries fall back to inline
    /// ingestion until [`Gateway::start`] is called again.
    pub fn stop(&self) {
        self.relay_alive.store(false, Ordering::SeqCst);
        self.reader_alive.store(false, Ordering::SeqCst);
        self.join_reader();
        self.join_relay();
    }

    /// Stop the loops, leave the presence set and close the device.
    /// Closing twice is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(signature = %self.signature, "closing gateway");
        self.alive.store(false, Ordering::SeqCst);
        self.stop();
        self.deregister();
        lock_stream(&self.stream).close();
        info!(signature = %self.signature, "gateway closed");
    }

    /// Whether the ingestion loop is running.
    pub fn is_running(&self) -> bool {
        matches!(*self.ingest_slot(), IngestSlot::Running(_))
            && self.alive.load(Ordering::SeqCst)
            && self.reader_alive.load(Ordering::SeqCst)
    }

    /// Whether the relay loop is running.
    pub fn is_relaying(&self) -> bool {
        self.relay_alive.load(Ordering::SeqCst)
            && self
                .relay
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Send a command to the device.
    pub fn send(&self, command: &[u8], append_terminator: bool) -> SendStatus {
        self.writer.send(command, append_terminator)
    }

    /// Wait for a stored reply without sending anything.
    pub fn read(&self, wait_for: &str) -> QueryOutcome {
        self.wait_for_reply(wait_for, self.config.query_timeout)
    }

    /// Send `command` and wait for the reply correlated with it.
    ///
    /// Success requires both the stored reply and the wait token; a reply
    /// that is not a valid envelope is reported as a failure. The stored
    /// reply is deleted afterwards whatever the outcome.
    pub fn query(&self, command: &str, options: &QueryOptions) -> QueryOutcome {
        let token = resolve_wait_token(&self.snapshot.borrow().text(), &options.wait_for);
        debug!(command, wait_for = %token, "query");

        let status = self.writer.send(command.as_bytes(), true);
        if matches!(status, SendStatus::WriteFailed | SendStatus::PortUnavailable) {
            warn!(command, status = %status, "query command not delivered");
            self.clear_reply();
            return QueryOutcome::failed(Duration::ZERO);
        }

        thread::sleep(options.delay);
        self.wait_for_reply(&token, options.timeout)
    }

    pub fn signature(&self) -> &ConnectionSignature {
        &self.signature
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    /// Whether the signature is in the presence set.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Number the device will assign to the next command, when known.
    pub fn next_cmd_num(&self) -> Option<u64> {
        self.writer.next_cmd_num()
    }

    /// Last complete line received, valid or not.
    pub fn last_read_line(&self) -> String {
        self.snapshot.borrow().last_line.clone()
    }

    /// Envelope built for the last decoded frame.
    pub fn last_message(&self) -> Option<Envelope> {
        self.snapshot.borrow().last_message.clone()
    }

    pub fn stats(&self) -> IngestStats {
        self.snapshot.borrow().stats
    }

    fn wait_for_reply(&self, token: &str, timeout: Duration) -> QueryOutcome {
        let started = Instant::now();
        let read_key = self.signature.read_key();
        let mut last_seen = None;
        let mut satisfied = false;

        while started.elapsed() < timeout {
            if !self.is_running() {
                self.ingest_inline();
            }
            // Snapshot first: ingestion stores the reply before publishing
            // the line, so a visible token implies a current stored value.
            let visible = self.snapshot.borrow().contains(token);
            match self.bus.get(&read_key) {
                Ok(Some(value)) => {
                    satisfied = visible;
                    last_seen = Some(value);
                    if satisfied {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => debug!(key = %read_key, error = %err, "reply lookup failed"),
            }
            thread::sleep(WAIT_POLL);
        }
        self.clear_reply();

        let elapsed = started.elapsed();
        if !satisfied {
            debug!(wait_for = %token, ?elapsed, "reply not seen before timeout");
        }
        let envelope = last_seen
            .as_deref()
            .and_then(|data| Envelope::from_json(data).ok());
        QueryOutcome {
            success: satisfied && envelope.is_some(),
            data: last_seen,
            envelope,
            elapsed,
        }
    }

    /// Run one ingestion cycle on the caller's thread.
    fn ingest_inline(&self) {
        let read = match &mut *self.ingest_slot() {
            IngestSlot::Idle(ingestor) => ingestor.poll_once(),
            _ => return,
        };
        match read {
            Ok(0) => thread::sleep(self.config.poll_interval),
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "inline read failed");
                thread::sleep(self.config.poll_interval);
            }
        }
    }

    fn clear_reply(&self) {
        if let Err(err) = self.bus.delete(&self.signature.read_key()) {
            debug!(error = %err, "failed to clear stored reply");
        }
    }

    fn start_reader(&self) -> Result<()> {
        let mut slot = self.ingest_slot();
        let ingestor = match mem::replace(&mut *slot, IngestSlot::Lost) {
            IngestSlot::Idle(ingestor) => *ingestor,
            running @ IngestSlot::Running(_) => {
                *slot = running;
                return Ok(());
            }
            IngestSlot::Lost => self.fresh_ingestor(),
        };

        self.reader_alive.store(true, Ordering::SeqCst);
        let control = LoopControl::new(Arc::clone(&self.alive), Arc::clone(&self.reader_alive));
        // The ingestor is moved into the closure; on spawn failure it is lost
        // with it and rebuilt on the next start.
        let handle = thread::Builder::new()
            .name("comport-ingest".to_string())
            .spawn(move || ingestor.run(control))
            .map_err(|source| {
                self.reader_alive.store(false, Ordering::SeqCst);
                GatewayError::Spawn {
                    name: "ingest",
                    source,
                }
            })?;
        *slot = IngestSlot::Running(handle);
        Ok(())
    }

    fn start_relay(&self) -> Result<()> {
        let mut relay = self.relay.lock().unwrap_or_else(PoisonError::into_inner);
        if relay.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        if let Some(finished) = relay.take() {
            let _ = finished.join();
        }

        self.relay_alive.store(true, Ordering::SeqCst);
        let control = LoopControl::new(Arc::clone(&self.alive), Arc::clone(&self.relay_alive));
        let worker = CommandRelay::new(
            Arc::clone(&self.bus),
            self.signature.channel(),
            self.writer.clone(),
            self.config.relay_poll,
            self.config.relay_max_backoff,
        );
        let handle = thread::Builder::new()
            .name("comport-relay".to_string())
            .spawn(move || worker.run(control))
            .map_err(|source| {
                self.relay_alive.store(false, Ordering::SeqCst);
                GatewayError::Spawn {
                    name: "relay",
                    source,
                }
            })?;
        *relay = Some(handle);
        Ok(())
    }

    fn join_reader(&self) {
        let mut slot = self.ingest_slot();
        let ingestor = match mem::replace(&mut *slot, IngestSlot::Lost) {
            IngestSlot::Idle(ingestor) => *ingestor,
            IngestSlot::Running(handle) => match handle.join() {
                Ok(ingestor) => ingestor,
                Err(_) => {
                    error!(signature = %self.signature, "ingestion thread panicked");
                    self.fresh_ingestor()
                }
            },
            IngestSlot::Lost => self.fresh_ingestor(),
        };
        *slot = IngestSlot::Idle(Box::new(ingestor));
    }

    fn join_relay(&self) {
        let handle = self
            .relay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(signature = %self.signature, "relay thread panicked");
            }
        }
    }

    fn fresh_ingestor(&self) -> Ingestor {
        Ingestor::new(
            &self.config,
            &self.signature,
            Arc::clone(&self.stream),
            Arc::clone(&self.bus),
            self.writer.clone(),
            Arc::clone(&self.state),
        )
    }

    fn ingest_slot(&self) -> MutexGuard<'_, IngestSlot> {
        self.ingest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self) {
        let member = self.signature.to_string();
        let result = self
            .bus
            .ping()
            .and_then(|()| self.bus.set_add(&self.config.presence_set, &member));
        match result {
            Ok(_) => {
                self.registered.store(true, Ordering::SeqCst);
                info!(signature = %self.signature, set = %self.config.presence_set, "registered");
            }
            Err(err) => {
                let err = GatewayError::BusUnavailable(err.to_string());
                warn!(signature = %self.signature, error = %err, "presence registration skipped");
            }
        }
    }

    fn deregister(&self) {
        if !self.registered.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self
            .bus
            .set_remove(&self.config.presence_set, &self.signature.to_string())
        {
            warn!(signature = %self.signature, error = %err, "presence removal failed");
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("signature", &self.signature)
            .field("running", &self.is_running())
            .field("registered", &self.is_registered())
            .finish()
    }
}
