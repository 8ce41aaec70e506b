//! Message bus abstraction.
//!
//! The gateway talks to other processes through a small publish/subscribe
//! and key/value surface:
//! - `publish` on the `data` and `log:<name>` channels
//! - `listen` on the per-gateway command channel
//! - `get`/`set`/`delete` for the last sent and last read values
//! - set membership for the `ComPort` presence registry
//!
//! [`MemoryBus`] implements it in process; [`RedisBus`] (feature `redis`)
//! talks to a Redis server.

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(feature = "redis")]
pub mod redis;

pub use error::{BusError, Result};
pub use memory::MemoryBus;
pub use traits::{
    log_channel, BusPayload, MessageBus, DATA_CHANNEL, LOG_CHANNEL, PRESENCE_SET, UNSUBSCRIBE,
};

#[cfg(feature = "redis")]
pub use self::redis::{RedisBus, DEFAULT_PORT};
