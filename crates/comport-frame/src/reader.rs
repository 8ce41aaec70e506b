use bytes::BytesMut;
use serde_json::Value;
use tracing::{debug, warn};

use crate::codec::{extract_line, match_frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::frame::{DecodedFrame, ErrorDescriptor};

/// Stage name recorded in error descriptors for body decode failures.
const DECODE_STAGE: &str = "decode_body";

/// Outcome of one parsing step over the receive buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseStep {
    /// No complete line is buffered yet.
    NeedMoreData,
    /// A line matched the wrapper. The payload may still be an error
    /// descriptor if the body failed to decode.
    Frame(DecodedFrame),
    /// A line (or an oversized unterminated tail) failed the wrapper grammar.
    Malformed { line: String },
}

/// Turns a growing receive buffer into decoded frames.
///
/// The parser holds no buffer of its own: the caller owns the bytes and the
/// parser only consumes complete lines from the front. Resetting the buffer
/// after a malformed line is the caller's decision.
#[derive(Debug, Clone)]
pub struct FrameParser {
    origin: String,
    config: FrameConfig,
}

impl FrameParser {
    /// Create a parser whose error descriptors name `origin`.
    pub fn new(origin: impl Into<String>) -> Self {
        Self::with_config(origin, FrameConfig::default())
    }

    /// Create a parser with explicit configuration.
    pub fn with_config(origin: impl Into<String>, config: FrameConfig) -> Self {
        Self {
            origin: origin.into(),
            config,
        }
    }

    /// Extract and decode the next line from `buf`.
    ///
    /// A found line is always consumed together with its terminator,
    /// whatever the decode result.
    pub fn next_frame(&self, buf: &mut BytesMut) -> ParseStep {
        let Some(line) = extract_line(buf) else {
            if buf.len() > self.config.max_pending {
                warn!(
                    pending = buf.len(),
                    max = self.config.max_pending,
                    "no line terminator within limit"
                );
                let line = String::from_utf8_lossy(&buf.split()).into_owned();
                return ParseStep::Malformed { line };
            }
            return ParseStep::NeedMoreData;
        };

        debug!(line = %line, "read line");
        match self.decode_line(&line) {
            Ok(frame) => ParseStep::Frame(frame),
            Err(_) => ParseStep::Malformed { line },
        }
    }

    /// Decode one line (without terminator).
    ///
    /// Fails only with [`FrameError::Malformed`]; a body that is not valid
    /// JSON still yields a frame carrying an error descriptor.
    pub fn decode_line(&self, line: &str) -> Result<DecodedFrame> {
        let Some(found) = match_frame(line) else {
            return Err(FrameError::Malformed {
                line: line.to_string(),
            });
        };

        match decode_body(found.body) {
            Ok(value) => Ok(DecodedFrame::data(line, found.sequence(), value)),
            Err(err) => {
                warn!(sequence = found.digits, error = %err, "frame body is not valid JSON");
                let descriptor = ErrorDescriptor::new(&self.origin, DECODE_STAGE, &err);
                Ok(DecodedFrame::decode_error(line, found.sequence(), descriptor))
            }
        }
    }

    /// Signature stamped into error descriptors.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Current parser configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

fn decode_body(body: &str) -> Result<Value> {
    serde_json::from_str(body).map_err(FrameError::BodyDecode)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::frame::{FramePayload, Sequence};

    const ORIGIN: &str = "127.0.0.1:/dev/ttyUSB0";

    #[test]
    fn decodes_command_response() {
        let parser = FrameParser::new(ORIGIN);
        let mut buf = BytesMut::from(&b"<5>{\"cmd\":\"ok\"}</5>\r\n"[..]);

        let ParseStep::Frame(frame) = parser.next_frame(&mut buf) else {
            panic!("expected a frame");
        };
        assert_eq!(frame.sequence.value(), Some(5));
        assert_eq!(frame.raw, "<5>{\"cmd\":\"ok\"}</5>");
        assert_eq!(frame.payload, FramePayload::Data(json!({"cmd": "ok"})));
        assert!(buf.is_empty());
        assert_eq!(parser.next_frame(&mut buf), ParseStep::NeedMoreData);
    }

    #[test]
    fn garbage_line_is_malformed_and_consumed() {
        let parser = FrameParser::new(ORIGIN);
        let mut buf = BytesMut::from(&b"garbage\r\n<1>{}</1>"[..]);

        assert_eq!(
            parser.next_frame(&mut buf),
            ParseStep::Malformed {
                line: "garbage".to_string()
            }
        );
        assert_eq!(&buf[..], b"<1>{}</1>");
    }

    #[test]
    fn bad_body_yields_error_descriptor_with_sequence() {
        let parser = FrameParser::new(ORIGIN);
        let mut buf = BytesMut::from(&b"<8>{not json</8>\r\n"[..]);

        let ParseStep::Frame(frame) = parser.next_frame(&mut buf) else {
            panic!("expected a frame");
        };
        assert_eq!(frame.sequence.value(), Some(8));
        match frame.payload {
            FramePayload::DecodeError(descriptor) => {
                assert_eq!(descriptor.from, ORIGIN);
                assert_eq!(descriptor.source, "ComPort");
                assert_eq!(descriptor.function, DECODE_STAGE);
                assert!(!descriptor.error.is_empty());
            }
            other => panic!("expected decode error, got {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_terminator() {
        let parser = FrameParser::new(ORIGIN);
        let mut buf = BytesMut::from(&b"<5>{\"cmd\""[..]);
        assert_eq!(parser.next_frame(&mut buf), ParseStep::NeedMoreData);
        assert_eq!(buf.len(), 9);
    }

    #[test]
    fn oversized_tail_is_malformed() {
        let cfg = FrameConfig {
            max_pending: 8,
            ..FrameConfig::default()
        };
        let parser = FrameParser::with_config(ORIGIN, cfg);
        let mut buf = BytesMut::from(&b"0123456789"[..]);

        assert!(matches!(
            parser.next_frame(&mut buf),
            ParseStep::Malformed { .. }
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn any_numbered_line_round_trips_sequence_and_raw() {
        let parser = FrameParser::new(ORIGIN);
        for n in [0u64, 1, 9, 10, 99, 12345, u32::MAX as u64] {
            for body in ["{}", "{\"cmd\":\"x\"}", "[1,2]", "not json", "a\nb", ""] {
                let line = format!("<{n}>{body}</{n}>");
                let frame = parser.decode_line(&line).unwrap();
                assert_eq!(frame.sequence.value(), Some(n));
                assert_eq!(frame.raw, line);
            }
        }
    }

    #[test]
    fn unmatched_line_reports_malformed() {
        let parser = FrameParser::new(ORIGIN);
        let err = parser.decode_line("<1>x</2>").unwrap_err();
        assert!(matches!(err, FrameError::Malformed { ref line } if line == "<1>x</2>"));
        assert_eq!(DecodedFrame::malformed("<1>x</2>").sequence, Sequence::Unknown);
    }

    #[test]
    fn oversized_sequence_still_decodes() {
        let parser = FrameParser::new(ORIGIN);
        for digits in ["9223372036854775808", "123456789012345678901"] {
            let line = format!("<{digits}>{{\"t\":1}}</{digits}>\r\n");
            let mut buf = BytesMut::from(line.as_str());
            match parser.next_frame(&mut buf) {
                ParseStep::Frame(frame) => {
                    assert_eq!(frame.sequence.digits(), Some(digits));
                    assert!(frame.is_data());
                }
                other => panic!("unexpected step: {other:?}"),
            }
        }
    }
}
