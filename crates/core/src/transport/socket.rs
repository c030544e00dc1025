//! WebSocket REPL transport
//!
//! Talks to the device-side WebSocket REPL (WebREPL). Frames carrying valid
//! UTF-8 go out as text, which is what the reference firmware expects;
//! anything else falls back to a binary frame so payload bytes survive.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{Transport, READ_CHANNEL_DEPTH};
use crate::{CoreError, Result};

/// Default WebREPL port.
pub const DEFAULT_WS_PORT: u16 = 8266;

/// How long a reachability probe may take.
const PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// How long each subnet-scan connection attempt may take.
const SCAN_TIMEOUT: Duration = Duration::from_secs(1);

type WsSink = futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// WebSocket transport bound to one host:port.
pub struct WebSocketTransport {
    host: String,
    port: u16,
    sink: Option<WsSink>,
    reader_task: Option<tokio::task::JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Create an unopened transport for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            sink: None,
            reader_task: None,
        }
    }

    /// Create with the default WebREPL port (8266).
    pub fn with_default_port(host: impl Into<String>) -> Self {
        Self::new(host, DEFAULT_WS_PORT)
    }

    fn url(&self) -> String {
        format!("ws://{}:{}/", self.host, self.port)
    }

    /// Probe the low 256 addresses of this host's /24 for anything
    /// accepting a connection on the configured port.
    ///
    /// Attempts run in parallel; each one is cancelled after one second.
    /// Returns the responding addresses, sorted. Purely a discovery aid,
    /// unrelated to the line-session protocol.
    pub async fn scan_subnet(&self) -> Vec<String> {
        let Some((prefix, _)) = self.host.rsplit_once('.') else {
            tracing::warn!("cannot derive subnet from {}", self.host);
            return Vec::new();
        };
        let mut attempts = tokio::task::JoinSet::new();
        for i in 0..=255u8 {
            let addr = format!("{}.{}", prefix, i);
            let port = self.port;
            attempts.spawn(async move {
                match tokio::time::timeout(SCAN_TIMEOUT, TcpStream::connect((addr.as_str(), port)))
                    .await
                {
                    Ok(Ok(_probe)) => {
                        tracing::debug!("scan | {}:{} is up", addr, port);
                        Some(addr)
                    }
                    _ => None,
                }
            });
        }
        let mut up = Vec::new();
        while let Some(result) = attempts.join_next().await {
            if let Ok(Some(addr)) = result {
                up.push(addr);
            }
        }
        up.sort();
        up
    }

    fn spawn_reader(
        mut stream: futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
        name: String,
    ) -> (mpsc::Receiver<Bytes>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(READ_CHANNEL_DEPTH);
        let task = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let payload = match message {
                    Ok(Message::Text(text)) => Bytes::from(text.into_bytes()),
                    Ok(Message::Binary(data)) => Bytes::from(data),
                    Ok(Message::Close(frame)) => {
                        tracing::debug!("{} closed: {:?}", name, frame);
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!("{} read error: {}", name, e);
                        break;
                    }
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });
        (rx, task)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&mut self) -> Result<mpsc::Receiver<Bytes>> {
        if self.sink.is_some() {
            return Err(CoreError::Connection(format!(
                "{} is already connected",
                self.name()
            )));
        }
        let (ws, _response) = tokio_tungstenite::connect_async(self.url())
            .await
            .map_err(CoreError::from)?;
        let (sink, stream) = ws.split();
        let (rx, task) = Self::spawn_reader(stream, self.name());
        self.sink = Some(sink);
        self.reader_task = Some(task);
        tracing::debug!("{} connected", self.name());
        Ok(rx)
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        match &mut self.sink {
            Some(sink) => {
                let message = match std::str::from_utf8(data) {
                    Ok(text) => Message::Text(text.to_string()),
                    Err(_) => Message::Binary(data.to_vec()),
                };
                sink.send(message).await.map_err(CoreError::from)?;
                Ok(data.len())
            }
            None => Ok(0),
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.close().await;
            tracing::debug!("{} disconnected", self.name());
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }

    async fn is_available(&self) -> bool {
        let target = (self.host.as_str(), self.port);
        match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(target)).await {
            Ok(Ok(_probe)) => {
                tracing::debug!("{} reachable", self.name());
                true
            }
            _ => false,
        }
    }

    fn name(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}
