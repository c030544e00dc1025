//! Byte transports to the device
//!
//! A transport is a full-duplex byte pipe to the board: a serial port or
//! the device-side WebSocket REPL. Above the line-framing layer both look
//! identical, so everything else in the crate works against the trait.

pub mod mock;
pub mod serial;
pub mod socket;

pub use mock::{MockHandle, MockTransport};
pub use serial::SerialTransport;
pub use socket::WebSocketTransport;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::Result;

/// Transport shared between the board orchestration layer and the session
/// that writes to it. The board owns lifecycle (connect/disconnect); the
/// session only writes and reads framed lines.
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Buffered chunks per transport before the reader pump applies backpressure.
pub(crate) const READ_CHANNEL_DEPTH: usize = 64;

/// A byte-oriented connection to the device.
///
/// At most one open handle per instance. `connect` opens the endpoint and
/// spawns a reader task that forwards incoming bytes into the returned
/// channel; dropping the receiver or calling `disconnect` tears it down.
/// Connection failures come back as `Err` values so the caller can react
/// (e.g. offer other connections) without aborting the workflow.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the endpoint. Returns the incoming-byte channel.
    async fn connect(&mut self) -> Result<mpsc::Receiver<Bytes>>;

    /// Write bytes to the device. Returns the count written, or 0 when
    /// not connected.
    async fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Close the connection. Idempotent; safe to call when already closed.
    async fn disconnect(&mut self);

    /// Whether the configured endpoint currently looks reachable.
    async fn is_available(&self) -> bool;

    /// Human-readable endpoint name, e.g. `/dev/ttyUSB0` or `ws://host:port`.
    fn name(&self) -> String;
}
