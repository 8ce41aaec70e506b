use std::ops::ControlFlow;
use std::time::Duration;

use crate::error::Result;

/// Channel every decoded device frame is published on.
pub const DATA_CHANNEL: &str = "data";

/// Prefix of log channels; records go to `log:<name>`.
pub const LOG_CHANNEL: &str = "log";

/// Set holding the signatures of running gateways.
pub const PRESENCE_SET: &str = "ComPort";

/// Payload that ends a subscription.
pub const UNSUBSCRIBE: &str = "unsubscribe";

/// Log channel for a named component.
pub fn log_channel(name: &str) -> String {
    format!("{LOG_CHANNEL}:{name}")
}

/// A message received from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusPayload {
    /// A UTF-8 text payload.
    Text(String),
    /// A payload that is not valid UTF-8.
    Binary(Vec<u8>),
    /// The subscription was asked to end.
    Unsubscribe,
}

impl BusPayload {
    /// Classify raw payload bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => Self::from_text(text),
            Err(err) => BusPayload::Binary(err.into_bytes()),
        }
    }

    /// Classify a text payload, recognising the unsubscribe sentinel.
    pub fn from_text(text: String) -> Self {
        if text == UNSUBSCRIBE {
            BusPayload::Unsubscribe
        } else {
            BusPayload::Text(text)
        }
    }
}

/// Opaque publish/subscribe and key/value service.
///
/// Implementations are shared between the gateway's foreground API and its
/// background loops, so every method takes `&self`.
pub trait MessageBus: Send + Sync {
    /// Check that the bus is reachable.
    fn ping(&self) -> Result<()>;

    /// Publish `payload` on `channel`. Returns the number of receivers.
    fn publish(&self, channel: &str, payload: &str) -> Result<usize>;

    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, overwriting any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Add `member` to `set`. Returns whether it was newly added.
    fn set_add(&self, set: &str, member: &str) -> Result<bool>;

    /// Remove `member` from `set`. Returns whether it was present.
    fn set_remove(&self, set: &str, member: &str) -> Result<bool>;

    fn set_contains(&self, set: &str, member: &str) -> Result<bool>;

    /// Subscribe to `channel` and feed the handler until it breaks.
    ///
    /// The handler receives `Some(payload)` for each message and `None`
    /// whenever `poll` elapses without one, so the caller can check its own
    /// stop flag. Returns `Ok(())` once the handler breaks; backend failures
    /// end the subscription with an error.
    fn listen(
        &self,
        channel: &str,
        poll: Duration,
        handler: &mut dyn FnMut(Option<BusPayload>) -> ControlFlow<()>,
    ) -> Result<()>;
}

impl<T: MessageBus + ?Sized> MessageBus for std::sync::Arc<T> {
    fn ping(&self) -> Result<()> {
        (**self).ping()
    }

    fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        (**self).publish(channel, payload)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        (**self).delete(key)
    }

    fn set_add(&self, set: &str, member: &str) -> Result<bool> {
        (**self).set_add(set, member)
    }

    fn set_remove(&self, set: &str, member: &str) -> Result<bool> {
        (**self).set_remove(set, member)
    }

    fn set_contains(&self, set: &str, member: &str) -> Result<bool> {
        (**self).set_contains(set, member)
    }

    fn listen(
        &self,
        channel: &str,
        poll: Duration,
        handler: &mut dyn FnMut(Option<BusPayload>) -> ControlFlow<()>,
    ) -> Result<()> {
        (**self).listen(channel, poll, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_text_is_unsubscribe() {
        assert_eq!(BusPayload::from_text("unsubscribe".into()), BusPayload::Unsubscribe);
        assert_eq!(
            BusPayload::from_text("PING".into()),
            BusPayload::Text("PING".into())
        );
    }

    #[test]
    fn invalid_utf8_is_binary() {
        assert_eq!(
            BusPayload::from_bytes(vec![0xff, 0x00]),
            BusPayload::Binary(vec![0xff, 0x00])
        );
        assert_eq!(
            BusPayload::from_bytes(b"I".to_vec()),
            BusPayload::Text("I".into())
        );
    }

    #[test]
    fn log_channel_is_prefixed() {
        assert_eq!(log_channel("comport"), "log:comport");
    }
}
