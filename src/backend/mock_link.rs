//! Scripted in-memory serial link for testing without hardware
//!
//! The link side is handed to the session worker; the handle side stays with
//! the test to script incoming chunks, inspect written commands, and inject
//! channel failures.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::{Result, TelemvisError};
use crate::types::DeviceIdentity;

use super::transport::SerialLink;

#[derive(Debug, Default)]
struct MockLinkState {
    incoming: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    closed: bool,
}

/// The worker-side end of a scripted link
pub struct MockLink {
    state: Arc<Mutex<MockLinkState>>,
    identity: Option<DeviceIdentity>,
}

/// The test-side controller for a [`MockLink`]
#[derive(Clone)]
pub struct MockLinkHandle {
    state: Arc<Mutex<MockLinkState>>,
}

impl MockLink {
    /// Create a link/handle pair
    pub fn new(identity: Option<DeviceIdentity>) -> (MockLink, MockLinkHandle) {
        let state = Arc::new(Mutex::new(MockLinkState::default()));
        (
            MockLink {
                state: state.clone(),
                identity,
            },
            MockLinkHandle { state },
        )
    }
}

impl SerialLink for MockLink {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(TelemvisError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock link closed",
            )));
        }
        let Some(chunk) = state.incoming.front_mut() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n == chunk.len() {
            state.incoming.pop_front();
        } else {
            chunk.drain(..n);
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(TelemvisError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock link closed",
            )));
        }
        state.written.extend_from_slice(data);
        Ok(())
    }

    fn identity(&self) -> Option<DeviceIdentity> {
        self.identity
    }
}

impl MockLinkHandle {
    /// Queue a chunk for the worker to read
    pub fn push_chunk(&self, chunk: impl AsRef<[u8]>) {
        self.state
            .lock()
            .unwrap()
            .incoming
            .push_back(chunk.as_ref().to_vec());
    }

    /// Everything the worker has written so far, as text
    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().unwrap().written).to_string()
    }

    /// Make every further read and write fail (device unplugged)
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }

    /// Whether all scripted chunks have been consumed
    pub fn drained(&self) -> bool {
        self.state.lock().unwrap().incoming.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_read_in_order_across_small_buffers() {
        let (mut link, handle) = MockLink::new(None);
        handle.push_chunk("hello ");
        handle.push_chunk("world");

        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            let n = link.read_chunk(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(String::from_utf8(out).unwrap(), "hello world");
        assert!(handle.drained());
    }

    #[test]
    fn test_writes_are_captured() {
        let (mut link, handle) = MockLink::new(None);
        link.write_all(b"AT+SEND=42,3,ARM\r\n").unwrap();
        assert_eq!(handle.written(), "AT+SEND=42,3,ARM\r\n");
    }

    #[test]
    fn test_close_fails_reads() {
        let (mut link, handle) = MockLink::new(None);
        handle.close();
        let mut buf = [0u8; 8];
        assert!(link.read_chunk(&mut buf).is_err());
        assert!(link.write_all(b"x").is_err());
    }
}
