use bytes::{Buf, BytesMut};

use crate::frame::Sequence;
use crate::protocol::LINE_TERMINATOR;

/// Default cap on the unterminated tail kept in the receive buffer: 64 KiB.
pub const DEFAULT_MAX_PENDING: usize = 64 * 1024;

/// A line that matched the `<N>BODY</N>` wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMatch<'a> {
    /// The digits of `N`, shared verbatim by both tags.
    pub digits: &'a str,
    /// Everything between the tags, verbatim.
    pub body: &'a str,
}

impl FrameMatch<'_> {
    pub fn sequence(&self) -> Sequence {
        Sequence::Number(self.digits.to_string())
    }
}

/// Position of the first CRLF in `buf`.
pub fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(LINE_TERMINATOR.len())
        .position(|window| window == LINE_TERMINATOR)
}

/// Remove the first complete line from `src`.
///
/// Returns `None` (leaving `src` untouched) when no CRLF has arrived yet.
/// Otherwise the line and its terminator are consumed unconditionally and the
/// line text is returned without the terminator. Invalid UTF-8 is replaced
/// rather than rejected; serial noise must not stop the reader.
pub fn extract_line(src: &mut BytesMut) -> Option<String> {
    let end = find_terminator(src)?;
    let line = src.split_to(end);
    src.advance(LINE_TERMINATOR.len());
    Some(String::from_utf8_lossy(&line).into_owned())
}

/// Match `line` against the numbered wrapper grammar.
///
/// Wire format:
/// ```text
/// <N>BODY</N>\r\n
/// ```
/// `N` is a run of decimal digits of any length, repeated verbatim in the
/// closing tag. The first
/// opening tag that has a matching closing tag wins; `BODY` runs to the last
/// occurrence of that closing tag and may contain anything, newlines
/// included.
pub fn match_frame(line: &str) -> Option<FrameMatch<'_>> {
    let bytes = line.as_bytes();
    let mut cursor = 0usize;

    while let Some(offset) = line[cursor..].find('<') {
        let open = cursor + offset;
        let digits_start = open + 1;
        let digits_len = bytes[digits_start..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        let digits_end = digits_start + digits_len;

        if digits_len > 0 && bytes.get(digits_end) == Some(&b'>') {
            let digits = &line[digits_start..digits_end];
            let body_start = digits_end + 1;
            let closing = format!("</{digits}>");
            if let Some(body_len) = line[body_start..].rfind(&closing) {
                return Some(FrameMatch {
                    digits,
                    body: &line[body_start..body_start + body_len],
                });
            }
        }

        cursor = open + 1;
    }

    None
}

/// Configuration for the frame parser.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum bytes kept while waiting for a terminator. A longer tail is
    /// treated as a desynchronized stream. Default: 64 KiB.
    pub max_pending: usize,
    /// Whether a malformed line should clear the whole receive buffer.
    pub clear_after_error: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING,
            clear_after_error: true,
        }
    }
}
