/// Errors raised by a message bus backend.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The bus cannot be reached.
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    /// The bus handle was shut down.
    #[error("bus closed")]
    Closed,

    /// The backend rejected or failed an operation.
    #[error("bus backend error: {0}")]
    Backend(String),
}

impl BusError {
    /// Whether the failure means the bus is unreachable rather than a
    /// single operation going wrong.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BusError::Unavailable(_) | BusError::Closed)
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            BusError::Unavailable(err.to_string())
        } else {
            BusError::Backend(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
