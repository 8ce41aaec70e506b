//! Gateway between AVR serial firmware and a Redis message bus.
//!
//! comport reads numbered JSON lines from a microcontroller, republishes
//! them on a message bus, and relays commands from the bus back to the
//! device.
//!
//! # Crate Structure
//!
//! - [`transport`]: Device byte streams (serial ports behind `serial`, in-memory)
//! - [`frame`]: `<N>BODY</N>` line framing, envelopes and sequence correlation
//! - [`bus`]: Publish/subscribe and key/value bus (Redis behind `redis`)
//! - [`gateway`]: Ingestion, command relay and synchronous queries

/// Re-export transport types.
pub mod transport {
    pub use comport_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use comport_frame::*;
}

/// Re-export bus types.
pub mod bus {
    pub use comport_bus::*;
}

/// Re-export gateway types.
pub mod gateway {
    pub use comport_gateway::*;
}
