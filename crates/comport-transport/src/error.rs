/// Errors that can occur on a device byte stream.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The device could not be opened.
    #[error("failed to open {path}: {message}")]
    Open { path: String, message: String },

    /// An operation needed an open stream but the stream is closed.
    #[error("stream {0} is not open")]
    NotOpen(String),

    /// An I/O error occurred on the stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream was shut down for good and cannot be reopened.
    #[error("transport closed")]
    Closed,
}

#[cfg(feature = "serial")]
impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> Self {
        TransportError::Io(err.into())
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
