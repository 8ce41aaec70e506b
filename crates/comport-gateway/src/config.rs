use std::time::Duration;

use comport_bus::{DATA_CHANNEL, PRESENCE_SET};
use comport_frame::{FrameConfig, RECOVERY_COMMAND};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Host part of the signature. Discovered when `None`.
    pub host: Option<String>,
    /// Sleep between ingestion polls when the device has nothing buffered.
    /// Default: 100ms.
    pub poll_interval: Duration,
    /// Bound on a synchronous query or read. Default: 2s.
    pub query_timeout: Duration,
    /// Pause between sending a query command and polling for its reply.
    /// Default: 10ms.
    pub query_delay: Duration,
    /// How long the relay waits on its subscription before re-checking its
    /// stop flag. Default: 250ms.
    pub relay_poll: Duration,
    /// Upper bound of the relay's reconnect back-off. Default: 5s.
    pub relay_max_backoff: Duration,
    /// Discard the whole receive buffer after a malformed line. Default: true.
    pub clear_after_error: bool,
    /// Maximum unterminated bytes kept before the tail counts as malformed.
    pub max_pending: usize,
    /// Channel decoded frames are published on. Default: `data`.
    pub data_channel: String,
    /// Presence registry set. Default: `ComPort`.
    pub presence_set: String,
    /// Command sent to resynchronize the device. Default: `Z`.
    pub recovery_command: String,
}

impl GatewayConfig {
    pub(crate) fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_pending: self.max_pending,
            clear_after_error: self.clear_after_error,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let frame = FrameConfig::default();
        Self {
            host: None,
            poll_interval: Duration::from_millis(100),
            query_timeout: Duration::from_secs(2),
            query_delay: Duration::from_millis(10),
            relay_poll: Duration::from_millis(250),
            relay_max_backoff: Duration::from_secs(5),
            clear_after_error: frame.clear_after_error,
            max_pending: frame.max_pending,
            data_channel: DATA_CHANNEL.to_string(),
            presence_set: PRESENCE_SET.to_string(),
            recovery_command: RECOVERY_COMMAND.to_string(),
        }
    }
}
