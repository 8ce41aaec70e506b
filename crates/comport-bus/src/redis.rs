use std::ops::ControlFlow;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use redis::{Client, Commands, Connection};
use tracing::{debug, info};

use crate::error::{BusError, Result};
use crate::traits::{BusPayload, MessageBus};

/// Default Redis port.
pub const DEFAULT_PORT: u16 = 6379;

/// Timeout for establishing a connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long commands fail fast after a connection attempt failed.
const RECONNECT_HOLDOFF: Duration = Duration::from_secs(5);

/// Suppresses reconnect attempts for a while after one failed, so callers
/// on the hot path do not each wait out [`CONNECT_TIMEOUT`].
#[derive(Debug, Default)]
struct ReconnectGate {
    retry_at: Option<Instant>,
}

impl ReconnectGate {
    /// Time left before the next attempt is allowed.
    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.retry_at
            .and_then(|at| at.checked_duration_since(now))
            .filter(|left| !left.is_zero())
    }

    fn failed(&mut self, now: Instant) {
        self.retry_at = Some(now + RECONNECT_HOLDOFF);
    }

    fn succeeded(&mut self) {
        self.retry_at = None;
    }
}

#[derive(Default)]
struct ConnState {
    conn: Option<Connection>,
    gate: ReconnectGate,
}

/// [`MessageBus`] backed by a Redis server.
///
/// Commands share one connection guarded by a mutex. After a failed
/// connection attempt, commands fail with [`BusError::Unavailable`] without
/// touching the network until the hold-off has passed. Every
/// [`MessageBus::listen`] call opens its own connection, since a Redis
/// connection in subscriber mode cannot serve other commands.
pub struct RedisBus {
    client: Client,
    url: String,
    state: Mutex<ConnState>,
}

impl RedisBus {
    /// Connect to `redis://host:port/`.
    ///
    /// Connecting is lazy: an unreachable server surfaces on the first
    /// command, so a gateway can start with the bus down.
    pub fn open(host: &str, port: u16) -> Result<Self> {
        let url = format!("redis://{host}:{port}/");
        let client = Client::open(url.as_str())?;
        Ok(Self {
            client,
            url,
            state: Mutex::new(ConnState::default()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn connect(&self) -> Result<Connection> {
        let conn = self
            .client
            .get_connection_with_timeout(CONNECT_TIMEOUT)
            .map_err(|err| BusError::Unavailable(format!("{}: {err}", self.url)))?;
        debug!(url = %self.url, "connected to redis");
        Ok(conn)
    }

    /// Run `f` on the shared command connection, reconnecting as needed.
    ///
    /// A connection that failed with an I/O error is dropped so the next
    /// call starts fresh.
    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> redis::RedisResult<T>) -> Result<T> {
        let mut guard: MutexGuard<'_, ConnState> =
            self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        if state.conn.is_none() {
            let now = Instant::now();
            if let Some(left) = state.gate.remaining(now) {
                return Err(BusError::Unavailable(format!(
                    "{}: reconnect held off for {}ms",
                    self.url,
                    left.as_millis()
                )));
            }
            match self.connect() {
                Ok(conn) => {
                    state.gate.succeeded();
                    state.conn = Some(conn);
                }
                Err(err) => {
                    state.gate.failed(Instant::now());
                    return Err(err);
                }
            }
        }
        let Some(conn) = state.conn.as_mut() else {
            return Err(BusError::Closed);
        };
        match f(conn) {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_io_error() || err.is_connection_dropped() {
                    state.conn = None;
                }
                Err(err.into())
            }
        }
    }
}

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus").field("url", &self.url).finish()
    }
}

impl MessageBus for RedisBus {
    fn ping(&self) -> Result<()> {
        self.with_conn(|conn| redis::cmd("PING").query::<String>(conn))
            .map(|_| ())
    }

    fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        self.with_conn(|conn| conn.publish::<_, _, usize>(channel, payload))
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| conn.get::<_, Option<String>>(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| conn.set::<_, _, ()>(key, value))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.with_conn(|conn| conn.del::<_, usize>(key))
            .map(|n| n > 0)
    }

    fn set_add(&self, set: &str, member: &str) -> Result<bool> {
        self.with_conn(|conn| conn.sadd::<_, _, usize>(set, member))
            .map(|n| n > 0)
    }

    fn set_remove(&self, set: &str, member: &str) -> Result<bool> {
        self.with_conn(|conn| conn.srem::<_, _, usize>(set, member))
            .map(|n| n > 0)
    }

    fn set_contains(&self, set: &str, member: &str) -> Result<bool> {
        self.with_conn(|conn| conn.sismember::<_, _, bool>(set, member))
    }

    fn listen(
        &self,
        channel: &str,
        poll: Duration,
        handler: &mut dyn FnMut(Option<BusPayload>) -> ControlFlow<()>,
    ) -> Result<()> {
        let mut conn = self.connect()?;
        let mut pubsub = conn.as_pubsub();
        pubsub.subscribe(channel)?;
        pubsub.set_read_timeout(Some(poll))?;
        info!(channel, url = %self.url, "subscribed");

        loop {
            let event = match pubsub.get_message() {
                Ok(msg) => Some(BusPayload::from_bytes(msg.get_payload_bytes().to_vec())),
                Err(err) if err.is_timeout() => None,
                Err(err) => return Err(err.into()),
            };
            if handler(event).is_break() {
                break;
            }
        }

        pubsub.unsubscribe(channel)?;
        debug!(channel, "unsubscribed");
        Ok(())
    }
}
