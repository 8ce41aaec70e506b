use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Buf, BytesMut};

use crate::error::{Result, TransportError};
use crate::traits::ByteStream;

#[derive(Debug, Default)]
struct MemoryState {
    inbound: BytesMut,
    written: Vec<u8>,
    open: bool,
    fail_open: bool,
    fail_writes: bool,
}

/// In-process [`ByteStream`] standing in for a serial device.
///
/// The paired [`MemoryStreamHandle`] plays the device: it injects bytes the
/// gateway will read and inspects what the gateway wrote.
#[derive(Debug)]
pub struct MemoryStream {
    name: String,
    state: Arc<Mutex<MemoryState>>,
}

/// Device side of a [`MemoryStream`].
#[derive(Debug, Clone)]
pub struct MemoryStreamHandle {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStream {
    /// Create an open stream and its device-side handle.
    pub fn new(name: impl Into<String>) -> (Self, MemoryStreamHandle) {
        let state = Arc::new(Mutex::new(MemoryState {
            open: true,
            ..MemoryState::default()
        }));
        let stream = Self {
            name: name.into(),
            state: Arc::clone(&state),
        };
        (stream, MemoryStreamHandle { state })
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ByteStream for MemoryStream {
    fn open(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.fail_open {
            return Err(TransportError::Open {
                path: self.name.clone(),
                message: "device unavailable".to_string(),
            });
        }
        state.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.state().open = false;
    }

    fn is_open(&self) -> bool {
        self.state().open
    }

    fn bytes_available(&mut self) -> Result<usize> {
        let state = self.state();
        if !state.open {
            return Err(TransportError::NotOpen(self.name.clone()));
        }
        Ok(state.inbound.len())
    }

    fn read(&mut self, max: usize) -> Result<Vec<u8>> {
        let mut state = self.state();
        if !state.open {
            return Err(TransportError::NotOpen(self.name.clone()));
        }
        let n = max.min(state.inbound.len());
        let chunk = state.inbound.split_to(n);
        Ok(chunk.to_vec())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.state();
        if !state.open {
            return Err(TransportError::NotOpen(self.name.clone()));
        }
        if state.fail_writes {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated write failure",
            )));
        }
        state.written.extend_from_slice(data);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl MemoryStreamHandle {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue bytes as if the device had sent them.
    pub fn push(&self, data: impl AsRef<[u8]>) {
        self.state().inbound.extend_from_slice(data.as_ref());
    }

    /// Bytes not yet read by the gateway.
    pub fn pending(&self) -> usize {
        self.state().inbound.len()
    }

    /// Everything written to the device so far.
    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    /// Everything written so far, as text.
    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.state().written).into_owned()
    }

    /// Take and clear the written bytes.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state().written)
    }

    /// Drop unread inbound bytes.
    pub fn discard_pending(&self) {
        let mut state = self.state();
        let len = state.inbound.len();
        state.inbound.advance(len);
    }

    /// Whether the gateway side currently has the stream open.
    pub fn is_open(&self) -> bool {
        self.state().open
    }

    /// Simulate the device disappearing: close it and refuse reopening.
    pub fn unplug(&self) {
        let mut state = self.state();
        state.open = false;
        state.fail_open = true;
    }

    /// Allow the device to be opened again.
    pub fn plug_in(&self) {
        self.state().fail_open = false;
    }

    /// Make subsequent writes fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }
}
