//! Numbered line framing for the device protocol.
//!
//! Every message from the device is one CRLF-terminated line of the form
//! `<N>BODY</N>`, where `N` is the device's command sequence number and
//! `BODY` is normally a JSON object. This crate provides:
//! - Line extraction and wrapper matching over a receive buffer
//! - Decoded frames and error descriptors with their wire JSON keys
//! - Sequence adjacency helpers used to correlate a command with its reply
//! - The `FROM`/`TO`/`MSG` envelope published on the bus
//! - Command writing with terminator handling, plus a bare line link

pub mod codec;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod link;
pub mod protocol;
pub mod reader;
pub mod sequence;
pub mod writer;

pub use codec::{
    extract_line, find_terminator, match_frame, FrameConfig, FrameMatch, DEFAULT_MAX_PENDING,
};
pub use envelope::Envelope;
pub use error::{FrameError, Result};
pub use frame::{
    timestamp_now, DecodedFrame, ErrorDescriptor, FramePayload, Sequence, SEQUENCE_UNKNOWN,
    TIMESTAMP_FORMAT,
};
pub use link::LineLink;
pub use protocol::{
    terminate_command, COMMAND_MARKER, COMMAND_TERMINATOR, LINE_TERMINATOR, RECOVERY_COMMAND,
    SOURCE_TAG,
};
pub use reader::{FrameParser, ParseStep};
pub use sequence::{next_expected_sequence, resolve_wait_token, wait_token};
pub use writer::{encode_command, send_command, write_line, SendStatus};
