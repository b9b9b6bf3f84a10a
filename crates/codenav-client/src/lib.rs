//! LSP client plumbing: a Content-Length framed JSON-RPC transport, a language server
//! client built on top of it, and the shape decoding that turns protocol results into
//! 1-indexed records.

use serde_json::Value;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

pub mod client;
pub mod codec;
pub mod diagnostics;
pub mod message;
pub mod mock;
pub mod process;
pub mod protocol;
pub mod transport;

pub use client::{ClientOptions, ClientState, LspClient};
pub use diagnostics::DiagnosticsCache;
pub use message::{Message, Notification, Request, RequestId, Response, ResponseError};
pub use protocol::{DiagnosticResult, LocationResult, SymbolResult};
pub use transport::{NotificationHandler, Transport};

#[derive(Debug, thiserror::Error)]
pub enum LspError {
    #[error("connection to language server closed")]
    TransportClosed,

    #[error("{method} failed: server error {code}: {message}")]
    Protocol {
        method: String,
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("failed to encode {method} params: {source}")]
    Marshal {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("failed to start `{command}`: {source} (check that it is installed and on PATH)")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("initialize handshake with `{command}` failed: {source}")]
    Initialize {
        command: String,
        #[source]
        source: Box<LspError>,
    },

    #[error("line and column are 1-indexed, got {line}:{column}")]
    PositionRange { line: u32, column: u32 },

    #[error("invalid file path: {0}")]
    InvalidPath(String),

    #[error("failed to read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO: {0}")]
    Io(#[from] io::Error),
}

impl LspError {
    /// True for errors caused by the connection going away rather than by the request.
    pub fn is_closed(&self) -> bool {
        matches!(self, LspError::TransportClosed)
    }
}

pub type Result<T> = std::result::Result<T, LspError>;
