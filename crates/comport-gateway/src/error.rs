use std::time::Duration;

/// Errors that can occur in gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] comport_transport::TransportError),

    /// Bus-level error.
    #[error("bus error: {0}")]
    Bus(#[from] comport_bus::BusError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] comport_frame::FrameError),

    /// The bus could not be reached when it was required.
    #[error("bus unavailable: {0}")]
    BusUnavailable(String),

    /// A query did not see its reply in time.
    #[error("query timed out after {0:?}")]
    QueryTimeout(Duration),

    /// A background loop thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, GatewayError>;
