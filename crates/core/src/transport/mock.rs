//! In-memory transport for tests
//!
//! Plays the device's side of the wire: tests inject incoming bytes through
//! the handle and assert on what the host wrote.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{Transport, READ_CHANNEL_DEPTH};
use crate::{CoreError, Result};

/// Test-side handle paired with a [`MockTransport`].
pub struct MockHandle {
    incoming: mpsc::Sender<Bytes>,
    written: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MockHandle {
    /// Inject bytes as if the device had sent them.
    pub async fn push(&self, data: &[u8]) {
        let _ = self.incoming.send(Bytes::copy_from_slice(data)).await;
    }

    /// Take the next write the host performed, if any.
    pub fn next_write(&mut self) -> Option<Vec<u8>> {
        self.written.try_recv().ok()
    }

    /// Drain and concatenate everything the host has written so far.
    pub fn drain_writes(&mut self) -> Vec<u8> {
        let mut all = Vec::new();
        while let Ok(chunk) = self.written.try_recv() {
            all.extend_from_slice(&chunk);
        }
        all
    }
}

/// Channel-backed [`Transport`] double.
pub struct MockTransport {
    incoming: Option<mpsc::Receiver<Bytes>>,
    written: mpsc::UnboundedSender<Vec<u8>>,
    connected: bool,
    available: bool,
}

impl MockTransport {
    /// Create a transport/handle pair.
    pub fn new() -> (Self, MockHandle) {
        let (incoming_tx, incoming_rx) = mpsc::channel(READ_CHANNEL_DEPTH);
        let (written_tx, written_rx) = mpsc::unbounded_channel();
        (
            Self {
                incoming: Some(incoming_rx),
                written: written_tx,
                connected: false,
                available: true,
            },
            MockHandle {
                incoming: incoming_tx,
                written: written_rx,
            },
        )
    }

    /// Mark the endpoint unavailable for probe tests.
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<mpsc::Receiver<Bytes>> {
        match self.incoming.take() {
            Some(rx) => {
                self.connected = true;
                Ok(rx)
            }
            None => Err(CoreError::Connection("mock already connected".into())),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        if !self.connected {
            return Ok(0);
        }
        self.written
            .send(data.to_vec())
            .map_err(|_| CoreError::NotConnected)?;
        Ok(data.len())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    fn name(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_and_write_round() {
        let (mut transport, mut handle) = MockTransport::new();
        let mut rx = transport.connect().await.unwrap();

        handle.push(b"hello").await;
        assert_eq!(rx.recv().await.unwrap().as_ref(), b"hello");

        assert_eq!(transport.write(b"cmd").await.unwrap(), 3);
        assert_eq!(handle.next_write().unwrap(), b"cmd");
    }

    #[tokio::test]
    async fn test_write_before_connect_is_noop() {
        let (mut transport, mut handle) = MockTransport::new();
        assert_eq!(transport.write(b"cmd").await.unwrap(), 0);
        assert!(handle.next_write().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_idempotent() {
        let (mut transport, _handle) = MockTransport::new();
        transport.connect().await.unwrap();
        transport.disconnect().await;
        transport.disconnect().await;
        assert_eq!(transport.write(b"x").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_second_connect_fails() {
        let (mut transport, _handle) = MockTransport::new();
        transport.connect().await.unwrap();
        assert!(transport.connect().await.is_err());
    }
}
