use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::ByteStream;

/// Serial line settings.
///
/// Defaults match the AVR firmware the gateway talks to: 115200 8N1, no flow
/// control, one second read timeout.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0`.
    pub path: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Timeout for a single blocking read or write.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Settings for `path` with the default line parameters.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            timeout: Duration::from_secs(1),
        }
    }
}

/// A [`ByteStream`] backed by an OS serial port.
///
/// The port is opened eagerly by [`SerialStream::open_with`]; after a
/// [`ByteStream::close`] it can be reopened with the same settings.
pub struct SerialStream {
    config: SerialConfig,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialStream {
    /// Open the serial port described by `config`.
    pub fn open_with(config: SerialConfig) -> Result<Self> {
        let mut stream = Self::unopened(config);
        stream.open()?;
        Ok(stream)
    }

    /// Build a stream without touching the device yet.
    pub fn unopened(config: SerialConfig) -> Self {
        Self { config, port: None }
    }

    /// Serial settings in use.
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        let name = self.config.path.clone();
        self.port.as_mut().ok_or(TransportError::NotOpen(name))
    }
}

impl ByteStream for SerialStream {
    fn open(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }

        let port = serialport::new(&self.config.path, self.config.baud_rate)
            .data_bits(self.config.data_bits)
            .parity(self.config.parity)
            .stop_bits(self.config.stop_bits)
            .flow_control(self.config.flow_control)
            .timeout(self.config.timeout)
            .open()
            .map_err(|err| TransportError::Open {
                path: self.config.path.clone(),
                message: err.to_string(),
            })?;

        info!(
            path = %self.config.path,
            baud = self.config.baud_rate,
            "serial port opened"
        );
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(path = %self.config.path, "serial port closed");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let waiting = self.port_mut()?.bytes_to_read()?;
        Ok(waiting as usize)
    }

    fn read(&mut self, max: usize) -> Result<Vec<u8>> {
        let port = self.port_mut()?;
        let mut buf = vec![0u8; max];
        loop {
            match port.read(&mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(buf);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::TimedOut => return Ok(Vec::new()),
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        let mut offset = 0usize;
        while offset < data.len() {
            match port.write(&data[offset..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        loop {
            match port.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn name(&self) -> &str {
        &self.config.path
    }
}

impl std::fmt::Debug for SerialStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialStream")
            .field("path", &self.config.path)
            .field("baud_rate", &self.config.baud_rate)
            .field("open", &self.port.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_115200_8n1() {
        let cfg = SerialConfig::new("/dev/arduino");
        assert_eq!(cfg.path, "/dev/arduino");
        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.data_bits, DataBits::Eight);
        assert_eq!(cfg.parity, Parity::None);
        assert_eq!(cfg.stop_bits, StopBits::One);
    }

    #[test]
    fn unopened_stream_reports_not_open() {
        let mut stream = SerialStream::unopened(SerialConfig::new("/dev/does-not-exist"));
        assert!(!stream.is_open());
        assert!(matches!(
            stream.bytes_available(),
            Err(TransportError::NotOpen(_))
        ));
        assert!(matches!(
            stream.write_all(b"x"),
            Err(TransportError::NotOpen(_))
        ));
    }

    #[test]
    fn open_missing_device_fails() {
        let result = SerialStream::open_with(SerialConfig::new("/dev/comport-missing-device"));
        assert!(matches!(result, Err(TransportError::Open { .. })));
    }
}
