//! Mock transport for testing

use super::Transport;
use crate::types::{LinkError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// In-memory stand-in for the radio module's serial port
///
/// Clones share state, so a test keeps one clone to inject lines and inspect
/// writes while the link owns the other.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
    pending_line: Vec<u8>,
    auto_ok: bool,
    closed: bool,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                read_buffer: VecDeque::new(),
                write_buffer: Vec::new(),
                pending_line: Vec::new(),
                auto_ok: false,
                closed: false,
            })),
        }
    }

    /// Answer every written `AT` line with `+OK`, like an idle module
    pub fn with_auto_ok(self) -> Self {
        self.lock().auto_ok = true;
        self
    }

    /// Inject raw bytes, for example a line split across reads
    pub fn inject_read(&self, data: &[u8]) {
        self.lock().read_buffer.extend(data);
    }

    /// Inject one CRLF-terminated line
    pub fn inject_line(&self, line: &str) {
        let mut inner = self.lock();
        inner.read_buffer.extend(line.as_bytes());
        inner.read_buffer.extend(b"\r\n");
    }

    /// Written data split into lines
    pub fn written_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.lock().write_buffer)
            .split("\r\n")
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Make every further read and write fail, like an unplugged adapter
    pub fn disconnect(&self) {
        self.lock().closed = true;
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let count = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(LinkError::Closed);
            }
            let available = inner.read_buffer.len().min(buffer.len());
            for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..available)) {
                *slot = byte;
            }
            available
        };

        // Behave like a port with a short read timeout
        if count == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        Ok(count)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(LinkError::Closed);
        }
        inner.write_buffer.extend_from_slice(data);

        if inner.auto_ok {
            inner.pending_line.extend_from_slice(data);
            while let Some(pos) = inner.pending_line.windows(2).position(|w| w == b"\r\n") {
                let line: Vec<u8> = inner.pending_line.drain(..pos + 2).collect();
                if line.starts_with(b"AT") {
                    inner.read_buffer.extend(b"+OK\r\n");
                }
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}
