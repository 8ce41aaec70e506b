use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use tracing::debug;

use crate::error::{BusError, Result};
use crate::traits::{BusPayload, MessageBus};

#[derive(Debug, Default)]
struct Tables {
    values: HashMap<String, String>,
    sets: HashMap<String, HashSet<String>>,
    published: Vec<(String, String)>,
}

/// In-process bus with the semantics the gateway expects from Redis.
///
/// Publishes fan out to every live subscriber of a channel and are recorded
/// so tests can assert on them. The bus can be switched offline to
/// simulate an unreachable server.
#[derive(Debug, Default)]
pub struct MemoryBus {
    tables: Mutex<Tables>,
    subscribers: Mutex<HashMap<String, Vec<Sender<BusPayload>>>>,
    offline: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`BusError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Payloads published on `channel`, oldest first.
    pub fn published(&self, channel: &str) -> Vec<String> {
        self.tables()
            .published
            .iter()
            .filter(|(ch, _)| ch == channel)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Forget the publish history.
    pub fn clear_published(&self) {
        self.tables().published.clear();
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers()
            .get(channel)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Deliver raw bytes to subscribers without recording them.
    pub fn publish_bytes(&self, channel: &str, payload: &[u8]) -> Result<usize> {
        self.check_online()?;
        Ok(self.fan_out(channel, BusPayload::from_bytes(payload.to_vec())))
    }

    /// Members of `set`, sorted.
    pub fn members(&self, set: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .tables()
            .sets
            .get(set)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<String, Vec<Sender<BusPayload>>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("memory bus is offline".to_string()));
        }
        Ok(())
    }

    fn fan_out(&self, channel: &str, payload: BusPayload) -> usize {
        let mut subscribers = self.subscribers();
        let Some(subs) = subscribers.get_mut(channel) else {
            return 0;
        };
        subs.retain(|tx| tx.send(payload.clone()).is_ok());
        subs.len()
    }
}

impl MessageBus for MemoryBus {
    fn ping(&self) -> Result<()> {
        self.check_online()
    }

    fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        self.check_online()?;
        self.tables()
            .published
            .push((channel.to_string(), payload.to_string()));
        Ok(self.fan_out(channel, BusPayload::from_text(payload.to_string())))
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_online()?;
        Ok(self.tables().values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_online()?;
        self.tables()
            .values
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.check_online()?;
        Ok(self.tables().values.remove(key).is_some())
    }

    fn set_add(&self, set: &str, member: &str) -> Result<bool> {
        self.check_online()?;
        Ok(self
            .tables()
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    fn set_remove(&self, set: &str, member: &str) -> Result<bool> {
        self.check_online()?;
        Ok(self
            .tables()
            .sets
            .get_mut(set)
            .is_some_and(|s| s.remove(member)))
    }

    fn set_contains(&self, set: &str, member: &str) -> Result<bool> {
        self.check_online()?;
        Ok(self
            .tables()
            .sets
            .get(set)
            .is_some_and(|s| s.contains(member)))
    }

    fn listen(
        &self,
        channel: &str,
        poll: Duration,
        handler: &mut dyn FnMut(Option<BusPayload>) -> ControlFlow<()>,
    ) -> Result<()> {
        self.check_online()?;
        let (tx, rx) = unbounded();
        self.subscribers()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        debug!(channel, "subscribed");

        // The sender is pruned on the next publish once `rx` is dropped.
        loop {
            let event = match rx.recv_timeout(poll) {
                Ok(payload) => Some(payload),
                Err(RecvTimeoutError::Timeout) => {
                    self.check_online()?;
                    None
                }
                Err(RecvTimeoutError::Disconnected) => return Err(BusError::Closed),
            };
            if handler(event).is_break() {
                debug!(channel, "unsubscribed");
                return Ok(());
            }
        }
    }
}
