//! Command/response correlation by sequence adjacency.
//!
//! The firmware numbers every accepted command and echoes the number in the
//! wrapper of its response, so the response to the next command carries the
//! last seen number plus one. A synchronous query waits for the token
//! `<N+1>{"cmd":"` to show up instead of for an explicit request id.

use crate::protocol::COMMAND_MARKER;

/// Smallest `N` in `buffer` that opens a fresh command response
/// (`<N>{"cmd":"`), or `None` when the buffer holds no such marker.
pub fn next_expected_sequence(buffer: &str) -> Option<u64> {
    let bytes = buffer.as_bytes();
    buffer
        .match_indices(COMMAND_MARKER)
        .filter_map(|(marker, _)| sequence_before(bytes, marker))
        .min()
}

/// Token identifying the response that follows sequence number `seq`.
pub fn wait_token(seq: u64) -> String {
    format!("<{}>{}", seq.saturating_add(1), COMMAND_MARKER)
}

/// Token a query should wait for.
///
/// A non-empty `requested` token is used as is. Otherwise the token is
/// derived from the last command number visible in `buffer`; on a cold
/// start with no marker the (empty) requested token is kept, meaning any
/// complete line satisfies the wait.
pub fn resolve_wait_token(buffer: &str, requested: &str) -> String {
    if !requested.is_empty() {
        return requested.to_string();
    }
    next_expected_sequence(buffer)
        .map(wait_token)
        .unwrap_or_else(|| requested.to_string())
}

/// Parse the `<N>` tag that ends right before byte offset `end`.
fn sequence_before(bytes: &[u8], end: usize) -> Option<u64> {
    let close = end.checked_sub(1)?;
    if bytes[close] != b'>' {
        return None;
    }
    let digits = bytes[..close]
        .iter()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count();
    let digits_start = close - digits;
    if digits == 0 || digits_start == 0 || bytes[digits_start - 1] != b'<' {
        return None;
    }
    std::str::from_utf8(&bytes[digits_start..close])
        .ok()?
        .parse()
        .ok()
}
