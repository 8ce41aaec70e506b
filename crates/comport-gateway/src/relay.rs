use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use comport_bus::{BusPayload, MessageBus};
use comport_frame::SendStatus;
use tracing::{debug, info, warn};

use crate::control::LoopControl;
use crate::writer::DeviceWriter;

/// How one subscription ended. Only a payload counts as a delivery; idle
/// ticks do not reset the back-off.
#[derive(Debug)]
struct Subscription {
    result: comport_bus::Result<()>,
    delivered: bool,
    unsubscribed: bool,
}

/// Forwards commands published on the gateway's channel to the device.
pub struct CommandRelay {
    bus: Arc<dyn MessageBus>,
    channel: String,
    writer: DeviceWriter,
    poll: Duration,
    max_backoff: Duration,
}

impl CommandRelay {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        channel: impl Into<String>,
        writer: DeviceWriter,
        poll: Duration,
        max_backoff: Duration,
    ) -> Self {
        Self {
            bus,
            channel: channel.into(),
            writer,
            poll,
            max_backoff,
        }
    }

    /// Relay until `control` asks to stop or an unsubscribe arrives.
    ///
    /// Bus failures end the current subscription only; the relay
    /// resubscribes after a back-off that doubles up to `max_backoff`.
    pub fn run(self, control: LoopControl) {
        info!(channel = %self.channel, "command relay started");
        let mut backoff = self.poll;

        while control.is_running() {
            let subscription = self.subscribe_once(&control);
            match subscription.result {
                Ok(()) if subscription.unsubscribed => {
                    info!(channel = %self.channel, "unsubscribed");
                    control.stop();
                }
                Ok(()) => {}
                Err(err) => {
                    if subscription.delivered {
                        backoff = self.poll;
                    }
                    warn!(
                        channel = %self.channel,
                        error = %err,
                        retry_in = ?backoff,
                        "command subscription failed"
                    );
                    if !control.sleep(backoff, self.poll) {
                        break;
                    }
                    backoff = (backoff * 2).min(self.max_backoff);
                }
            }
        }

        info!(channel = %self.channel, "command relay stopped");
    }

    /// Listen on the channel until the subscription ends.
    fn subscribe_once(&self, control: &LoopControl) -> Subscription {
        let mut delivered = false;
        let mut unsubscribed = false;
        let result = self.bus.listen(&self.channel, self.poll, &mut |event| {
            if !control.is_running() {
                return ControlFlow::Break(());
            }
            match event {
                Some(payload) => {
                    delivered = true;
                    let flow = self.handle(payload);
                    unsubscribed = flow.is_break();
                    flow
                }
                None => ControlFlow::Continue(()),
            }
        });
        Subscription {
            result,
            delivered,
            unsubscribed,
        }
    }

    /// Handle one payload. Breaks on the unsubscribe sentinel.
    pub fn handle(&self, payload: BusPayload) -> ControlFlow<()> {
        match payload {
            BusPayload::Unsubscribe => ControlFlow::Break(()),
            BusPayload::Text(command) => {
                debug!(command = %command, "relaying command");
                let status = self.writer.send(command.as_bytes(), true);
                if !matches!(status, SendStatus::Sent | SendStatus::Empty) {
                    warn!(command = %command, status = %status, "relayed command not delivered");
                }
                ControlFlow::Continue(())
            }
            BusPayload::Binary(bytes) => {
                warn!(len = bytes.len(), "dropping non-text command");
                ControlFlow::Continue(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::thread;
    use std::time::Instant;

    use comport_bus::MemoryBus;
    use comport_transport::{MemoryStream, MemoryStreamHandle};
    use tokio::sync::watch;

    use super::*;
    use crate::ingest::BufferSnapshot;
    use crate::signature::ConnectionSignature;
    use crate::writer::SharedStream;

    const POLL: Duration = Duration::from_millis(20);

    fn relay() -> (CommandRelay, MemoryStreamHandle, Arc<MemoryBus>) {
        let (stream, device) = MemoryStream::new("/dev/ttyR");
        let bus = Arc::new(MemoryBus::new());
        let sig = ConnectionSignature::new("127.0.0.1", "/dev/ttyR");
        let (_state, snapshot) = watch::channel(BufferSnapshot::default());
        let shared: SharedStream = Arc::new(Mutex::new(Box::new(stream)));
        let writer = DeviceWriter::new(shared, bus.clone(), &sig, snapshot);
        let relay = CommandRelay::new(bus.clone(), sig.channel(), writer, POLL, POLL * 4);
        (relay, device, bus)
    }

    fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn text_is_forwarded_binary_dropped() {
        let (relay, device, _bus) = relay();
        assert!(relay.handle(BusPayload::Text("T".into())).is_continue());
        assert!(relay.handle(BusPayload::Binary(vec![0xff])).is_continue());
        assert!(relay.handle(BusPayload::Unsubscribe).is_break());
        assert_eq!(device.written_text(), "T\n");
    }

    #[test]
    fn unsubscribe_ends_loop() {
        let (relay, device, bus) = relay();
        let control = LoopControl::running();
        let loop_control = control.clone();
        let handle = thread::spawn(move || relay.run(loop_control));

        let channel = "127.0.0.1:/dev/ttyR";
        wait_until("subscription", || bus.subscriber_count(channel) > 0);
        bus.publish(channel, "I").unwrap();
        wait_until("forwarded command", || device.written_text() == "I\n");

        bus.publish(channel, "unsubscribe").unwrap();
        handle.join().unwrap();
        assert!(!control.is_running());
    }

    #[test]
    fn stop_flag_ends_loop() {
        let (relay, _device, _bus) = relay();
        let control = LoopControl::running();
        let loop_control = control.clone();
        let handle = thread::spawn(move || relay.run(loop_control));
        thread::sleep(POLL * 2);
        control.stop();
        handle.join().unwrap();
    }

    #[test]
    fn resubscribes_after_bus_outage() {
        let (relay, device, bus) = relay();
        bus.set_offline(true);
        let control = LoopControl::running();
        let loop_control = control.clone();
        let handle = thread::spawn(move || relay.run(loop_control));

        thread::sleep(POLL * 3);
        bus.set_offline(false);
        let channel = "127.0.0.1:/dev/ttyR";
        wait_until("resubscription", || bus.subscriber_count(channel) > 0);
        bus.publish(channel, "X").unwrap();
        wait_until("forwarded command", || device.written_text() == "X\n");

        control.stop();
        handle.join().unwrap();
    }

    #[test]
    fn idle_ticks_are_not_deliveries() {
        let (relay, _device, bus) = relay();
        let control = LoopControl::running();
        let handle = thread::spawn(move || relay.subscribe_once(&control));

        let channel = "127.0.0.1:/dev/ttyR";
        wait_until("subscription", || bus.subscriber_count(channel) > 0);
        thread::sleep(POLL * 3);
        bus.set_offline(true);

        let subscription = handle.join().unwrap();
        assert!(subscription.result.is_err());
        assert!(!subscription.delivered);
        assert!(!subscription.unsubscribed);
    }

    #[test]
    fn payload_before_outage_counts_as_delivery() {
        let (relay, device, bus) = relay();
        let control = LoopControl::running();
        let handle = thread::spawn(move || relay.subscribe_once(&control));

        let channel = "127.0.0.1:/dev/ttyR";
        wait_until("subscription", || bus.subscriber_count(channel) > 0);
        bus.publish(channel, "I").unwrap();
        wait_until("forwarded command", || device.written_text() == "I\n");
        bus.set_offline(true);

        let subscription = handle.join().unwrap();
        assert!(subscription.result.is_err());
        assert!(subscription.delivered);
    }
}
