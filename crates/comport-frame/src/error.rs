/// Errors that can occur while decoding device lines or bus envelopes.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The line does not match the `<N>BODY</N>` wrapper.
    #[error("malformed frame: {line:?}")]
    Malformed { line: String },

    /// The wrapper matched but the body is not valid JSON.
    #[error("frame body decode failed: {0}")]
    BodyDecode(#[source] serde_json::Error),

    /// An envelope could not be encoded or decoded.
    #[error("envelope codec error: {0}")]
    Envelope(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
