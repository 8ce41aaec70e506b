use std::fmt;
use std::io;

use comport_bus::BusError;
use comport_frame::FrameError;
use comport_gateway::GatewayError;
use comport_transport::TransportError;

// Exit code constants shared by every subcommand.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        TransportError::Open { ref message, .. } if message.contains("ermission denied") => {
            CliError::new(PERMISSION_DENIED, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn bus_error(context: &str, err: BusError) -> CliError {
    match err {
        BusError::Unavailable(_) | BusError::Closed => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        BusError::Backend(_) => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn gateway_error(context: &str, err: GatewayError) -> CliError {
    match err {
        GatewayError::Transport(err) => transport_error(context, err),
        GatewayError::Bus(err) => bus_error(context, err),
        GatewayError::Frame(err) => frame_error(context, err),
        GatewayError::BusUnavailable(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        GatewayError::QueryTimeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        GatewayError::Spawn { .. } => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn device_open_failure_is_transport_error() {
        let err = TransportError::Open {
            path: "/dev/ttyNONE".to_string(),
            message: "No such file or directory".to_string(),
        };
        let cli = transport_error("open failed", err);
        assert_eq!(cli.code, TRANSPORT_ERROR);
        assert!(cli.message.starts_with("open failed: "));
    }

    #[test]
    fn permission_denied_maps_to_its_own_code() {
        let err = TransportError::Open {
            path: "/dev/ttyS0".to_string(),
            message: "Permission denied".to_string(),
        };
        assert_eq!(transport_error("open", err).code, PERMISSION_DENIED);

        let err = TransportError::Io(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(transport_error("read", err).code, PERMISSION_DENIED);
    }

    #[test]
    fn unreachable_bus_is_transport_error() {
        let cli = bus_error("publish", BusError::Unavailable("refused".to_string()));
        assert_eq!(cli.code, TRANSPORT_ERROR);
        let cli = bus_error("publish", BusError::Backend("WRONGTYPE".to_string()));
        assert_eq!(cli.code, FAILURE);
    }

    #[test]
    fn gateway_errors_dispatch_by_kind() {
        let cli = gateway_error("query", GatewayError::QueryTimeout(Duration::from_secs(2)));
        assert_eq!(cli.code, TIMEOUT);

        let cli = gateway_error(
            "open",
            GatewayError::Bus(BusError::Unavailable("down".to_string())),
        );
        assert_eq!(cli.code, TRANSPORT_ERROR);

        let spawn = GatewayError::Spawn {
            name: "comport-ingest",
            source: io::Error::from(io::ErrorKind::Other),
        };
        assert_eq!(gateway_error("start", spawn).code, INTERNAL);
    }
}
