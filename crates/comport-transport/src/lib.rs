//! Device byte stream abstraction.
//!
//! Provides a unified interface over the byte channel to the microcontroller:
//! - OS serial ports (behind the `serial` feature)
//! - An in-memory stream for tests and dry runs
//!
//! This is the lowest layer of comport. Everything else builds on top of
//! the [`ByteStream`] trait provided here.

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(feature = "serial")]
pub mod serial;

pub use error::{Result, TransportError};
pub use memory::{MemoryStream, MemoryStreamHandle};
pub use traits::ByteStream;

#[cfg(feature = "serial")]
pub use serial::{SerialConfig, SerialStream};
