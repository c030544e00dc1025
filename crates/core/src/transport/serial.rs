//! Serial port transport
//!
//! Wraps a USB/UART link via tokio-serial. The reader half is pumped into
//! an mpsc channel by a background task; the writer half stays with the
//! transport for `write` calls.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::{Transport, READ_CHANNEL_DEPTH};
use crate::{CoreError, Result};

/// Default baud rate for MicroPython boards.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Serial transport bound to one device path.
pub struct SerialTransport {
    path: String,
    baud: u32,
    writer: Option<WriteHalf<SerialStream>>,
    reader_task: Option<tokio::task::JoinHandle<()>>,
}

impl SerialTransport {
    /// Create an unopened transport for `path` at `baud`.
    pub fn new(path: impl Into<String>, baud: u32) -> Self {
        Self {
            path: path.into(),
            baud,
            writer: None,
            reader_task: None,
        }
    }

    /// Create with the default baud rate (115 200).
    pub fn with_default_baud(path: impl Into<String>) -> Self {
        Self::new(path, DEFAULT_BAUD)
    }

    /// Device path this transport is bound to.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Enumerate serial devices currently attached to the host.
    pub fn list_ports() -> Vec<String> {
        tokio_serial::available_ports()
            .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
            .unwrap_or_default()
    }

    fn spawn_reader(
        mut reader: ReadHalf<SerialStream>,
        path: String,
    ) -> (mpsc::Receiver<Bytes>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(READ_CHANNEL_DEPTH);
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        tracing::debug!("{} closed by peer", path);
                        break;
                    }
                    Ok(n) => {
                        if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("{} read error: {}", path, e);
                        break;
                    }
                }
            }
        });
        (rx, task)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&mut self) -> Result<mpsc::Receiver<Bytes>> {
        if self.writer.is_some() {
            return Err(CoreError::Connection(format!(
                "{} is already connected",
                self.path
            )));
        }
        let stream = tokio_serial::new(&self.path, self.baud)
            .open_native_async()
            .map_err(CoreError::from)?;
        let (reader, writer) = tokio::io::split(stream);
        let (rx, task) = Self::spawn_reader(reader, self.path.clone());
        self.writer = Some(writer);
        self.reader_task = Some(task);
        tracing::debug!("{} connected", self.path);
        Ok(rx)
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        match &mut self.writer {
            Some(writer) => {
                writer.write_all(data).await?;
                writer.flush().await?;
                Ok(data.len())
            }
            None => Ok(0),
        }
    }

    async fn disconnect(&mut self) {
        if self.writer.take().is_some() {
            tracing::debug!("{} disconnected", self.path);
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }

    async fn is_available(&self) -> bool {
        Self::list_ports().iter().any(|p| p == &self.path)
    }

    fn name(&self) -> String {
        self.path.clone()
    }
}
