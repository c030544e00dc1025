//! Board orchestration
//!
//! The board owns the current transport and is the only place that
//! sequences disconnect-before-reconnect. High-level operations never
//! reuse a live connection: each one asks the board for a fresh
//! [`LineSession`] and the board tears down whatever came before.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::session::{LineSession, SessionConfig};
use crate::snippets;
use crate::transport::{SharedTransport, Transport};
use crate::Result;

/// Abstraction over one device reachable via serial or WebSocket through
/// the same interface.
pub struct Board {
    transport: SharedTransport,
    session_config: SessionConfig,
}

impl Board {
    /// Create a board over the given transport.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    /// Create a board with custom session tuning.
    pub fn with_config(transport: Box<dyn Transport>, session_config: SessionConfig) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            session_config,
        }
    }

    /// Session tuning used for sessions this board creates.
    pub fn session_config(&self) -> &SessionConfig {
        &self.session_config
    }

    /// Endpoint name of the current transport.
    pub async fn name(&self) -> String {
        self.transport.lock().await.name()
    }

    /// Whether the current transport's endpoint looks reachable.
    pub async fn is_available(&self) -> bool {
        self.transport.lock().await.is_available().await
    }

    /// Swap in a different transport, disconnecting the old one first.
    pub async fn attach(&self, transport: Box<dyn Transport>) {
        let mut current = self.transport.lock().await;
        current.disconnect().await;
        *current = transport;
        tracing::info!("board now targets {}", current.name());
    }

    /// Open a fresh session, disconnecting any prior connection first.
    pub async fn connect(&self) -> Result<LineSession> {
        let rx = {
            let mut transport = self.transport.lock().await;
            transport.disconnect().await;
            let rx = transport.connect().await?;
            tracing::info!("connected to {}", transport.name());
            rx
        };
        Ok(LineSession::new(
            self.transport.clone(),
            rx,
            self.session_config.clone(),
        ))
    }

    /// Write raw bytes to the device.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        self.transport.lock().await.write(data).await
    }

    /// Close the current connection. Idempotent.
    pub async fn disconnect(&self) {
        self.transport.lock().await.disconnect().await;
    }

    /// Inject a script into the REPL via paste mode and execute it.
    ///
    /// Output streams back over whatever session is attached; this does
    /// not wait for completion.
    pub async fn run_script(&self, source: &str) -> Result<usize> {
        self.write(&snippets::paste_block(source)).await
    }
}
