//! Collaborator seams consumed by the protocol workflows
//!
//! The UI layer (or the CLI) supplies these. The core never prompts or
//! renders anything itself.

use async_trait::async_trait;

/// Supplies the password for a connection when the device asks for one.
///
/// Given the connection name (e.g. `/dev/ttyUSB0` or `ws://host:port`),
/// returns a cached or operator-supplied credential, or `None` if no
/// credential is available.
#[async_trait]
pub trait PasswordResolver: Send + Sync {
    async fn resolve(&self, connection: &str) -> Option<String>;
}

/// Resolver that never supplies a password.
pub struct NoPassword;

#[async_trait]
impl PasswordResolver for NoPassword {
    async fn resolve(&self, _connection: &str) -> Option<String> {
        None
    }
}

/// Resolver backed by a fixed credential.
pub struct StaticPassword(pub String);

#[async_trait]
impl PasswordResolver for StaticPassword {
    async fn resolve(&self, _connection: &str) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Receives progress percentages and short status text from long-running
/// workflows (upload, index build, file scan).
pub trait ProgressSink: Send + Sync {
    /// Report completion percentage (0-100).
    fn progress(&self, percent: u8);

    /// Report a short human-readable status line.
    fn status(&self, text: &str);
}

/// Sink that discards all reports.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn progress(&self, _percent: u8) {}
    fn status(&self, _text: &str) {}
}
