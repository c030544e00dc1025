//! Replink Core - Device query/upload protocol engine
//!
//! This crate provides:
//! - Byte transports (serial, WebSocket REPL) behind one trait
//! - Line-framed query sessions with inactivity-based completion
//! - File upload/download with sha256 verification
//! - Module and filesystem introspection
//! - Error types

pub const APP_VERSION_STRING: &str = "0.1.0";

pub mod board;
pub mod error;
pub mod hooks;
pub mod index;
pub mod introspect;
pub mod literal;
pub mod session;
pub mod snippets;
pub mod transfer;
pub mod transport;

// Re-export common types
pub use board::Board;
pub use error::{CoreError, Result};
pub use hooks::{NoPassword, NullSink, PasswordResolver, ProgressSink, StaticPassword};
pub use index::{FileNode, FileTree, ModuleIndex, SymbolInfo, SymbolKind};
pub use introspect::DeviceIntrospector;
pub use session::{LineSession, SessionConfig};
pub use transfer::{sha256_hex, FileTransfer, TransferJob, TransferStatus};
pub use transport::{MockHandle, MockTransport, SerialTransport, Transport, WebSocketTransport};
