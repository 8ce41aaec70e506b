//! Serial-to-bus gateway engine.
//!
//! A [`Gateway`] owns one device byte stream and one bus handle and runs
//! two background loops:
//! - ingestion: drains the device, decodes `<N>BODY</N>` lines, publishes
//!   each frame on `data` and stores it under `<signature>-read`, and
//!   sends the recovery command after a malformed line
//! - relay: forwards commands published on the `<signature>` channel to
//!   the device
//!
//! In the foreground it offers fire-and-forget [`Gateway::send`] and the
//! synchronous [`Gateway::query`], which correlates a command with its
//! reply by sequence adjacency.

pub mod config;
pub mod control;
pub mod error;
pub mod gateway;
pub mod ingest;
pub mod query;
pub mod relay;
pub mod signature;
pub mod writer;

pub use config::GatewayConfig;
pub use control::LoopControl;
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use ingest::{BufferSnapshot, IngestStats, Ingestor};
pub use query::{QueryOptions, QueryOutcome};
pub use relay::CommandRelay;
pub use signature::{host_ip, ConnectionSignature};
pub use writer::{DeviceWriter, SharedStream};
