//! Wire constants of the device line protocol.
//!
//! The device terminates every line it sends with CRLF; commands sent to the
//! device are terminated with a bare LF.

/// Terminator of lines received from the device.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Terminator appended to commands sent to the device.
pub const COMMAND_TERMINATOR: u8 = b'\n';

/// Command asking the device to reset its sequence counter.
pub const RECOVERY_COMMAND: &str = "Z";

/// Source tag stamped into error descriptors.
pub const SOURCE_TAG: &str = "ComPort";

/// Marker that follows the opening tag of a fresh command response.
pub const COMMAND_MARKER: &str = "{\"cmd\":\"";

/// Append the command terminator unless the command already ends with it.
///
/// Returns an empty vector for an empty command so callers can treat it as a
/// no-op.
pub fn terminate_command(command: &[u8]) -> Vec<u8> {
    let mut line = command.to_vec();
    if !line.is_empty() && line.last() != Some(&COMMAND_TERMINATOR) {
        line.push(COMMAND_TERMINATOR);
    }
    line
}
