//! Code navigation over language servers: one server per language, started on first use
//! and shared by every request for that language.

pub mod config;
pub mod language;
pub mod launcher;
pub mod manager;
pub mod tool;

pub use config::{LspConfig, ServerDefinition};
pub use language::detect_language;
pub use launcher::{ProcessLauncher, ServerLauncher};
pub use manager::{LspManager, SymbolScope};
pub use tool::{LspTool, ToolResult};

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("LSP support is disabled in the configuration")]
    Disabled,

    #[error("unable to detect language for file: {}", path.display())]
    UnknownLanguage { path: PathBuf },

    #[error("no LSP server configured for language: {language}")]
    NoServerConfigured { language: String },

    #[error("LSP server for {language} is disabled")]
    ServerDisabled { language: String },

    #[error("LSP server command not found: {command} (install {command} and make sure it is on PATH)")]
    BinaryNotFound { command: String, language: String },

    #[error("LSP server for {language} did not start within {timeout:?}")]
    StartupTimeout { language: String, timeout: Duration },

    #[error("failed to start LSP server for {language}: {source}")]
    Start {
        language: String,
        #[source]
        source: codenav_client::LspError,
    },

    #[error("{language} server on {}: {source}", path.display())]
    Client {
        language: String,
        path: PathBuf,
        #[source]
        source: codenav_client::LspError,
    },

    #[error("invalid config {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },

    #[error("errors shutting down LSP servers: {}", .0.join("; "))]
    Shutdown(Vec<String>),
}

pub type Result<T> = std::result::Result<T, ManagerError>;
