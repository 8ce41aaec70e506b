use crate::error::Result;

/// A duplex byte channel to a device.
///
/// This is the only surface the gateway needs from a serial driver: open and
/// close the device, ask how many bytes are waiting, read them, and write a
/// command. Implementations are not expected to be internally synchronized;
/// callers that share a stream across threads wrap it in a mutex.
pub trait ByteStream: Send {
    /// Open the device. Opening an already-open stream is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Close the device. Closing a closed stream is a no-op.
    fn close(&mut self);

    /// Whether the device is currently open.
    fn is_open(&self) -> bool;

    /// Number of bytes that can be read without blocking.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Read up to `max` bytes.
    ///
    /// Returns fewer bytes when the device has fewer buffered. Never blocks
    /// longer than the implementation's configured read timeout.
    fn read(&mut self, max: usize) -> Result<Vec<u8>>;

    /// Write the whole buffer and flush it to the device.
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Device name used for diagnostics and the connection signature.
    fn name(&self) -> &str;

    /// Make sure the stream is open, opening it if required.
    fn ensure_open(&mut self) -> Result<()> {
        if !self.is_open() {
            self.open()?;
        }
        Ok(())
    }
}

impl<T: ByteStream + ?Sized> ByteStream for Box<T> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn bytes_available(&mut self) -> Result<usize> {
        (**self).bytes_available()
    }

    fn read(&mut self, max: usize) -> Result<Vec<u8>> {
        (**self).read(max)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_all(data)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
