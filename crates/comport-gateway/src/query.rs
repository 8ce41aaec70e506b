use std::time::Duration;

use comport_frame::Envelope;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};

/// Options for a synchronous query.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Text that must be visible in the receive state before the stored
    /// reply counts. Derived from the last command number when empty.
    pub wait_for: String,
    /// Bound on the wait. Default: 2s.
    pub timeout: Duration,
    /// Pause after sending, before polling starts. Default: 10ms.
    pub delay: Duration,
}

impl QueryOptions {
    /// Options using the gateway's configured timing.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            wait_for: String::new(),
            timeout: config.query_timeout,
            delay: config.query_delay,
        }
    }

    pub fn wait_for(mut self, token: impl Into<String>) -> Self {
        self.wait_for = token.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

/// Result of a query or read.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    /// The wait was satisfied and the stored value is a valid envelope.
    pub success: bool,
    /// The last stored value seen, possibly stale.
    pub data: Option<String>,
    /// `data` decoded as an envelope, when it is one.
    pub envelope: Option<Envelope>,
    /// Time spent waiting.
    pub elapsed: Duration,
}

impl QueryOutcome {
    pub(crate) fn failed(elapsed: Duration) -> Self {
        Self {
            success: false,
            data: None,
            envelope: None,
            elapsed,
        }
    }

    /// Turn an unsuccessful outcome into [`GatewayError::QueryTimeout`].
    pub fn into_envelope(self, timeout: Duration) -> Result<Envelope> {
        match (self.success, self.envelope) {
            (true, Some(envelope)) => Ok(envelope),
            _ => Err(GatewayError::QueryTimeout(timeout)),
        }
    }
}
