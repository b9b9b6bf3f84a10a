use crate::config::ServerDefinition;
use async_trait::async_trait;
use codenav_client::{ClientOptions, LspClient};
use std::path::{Path, PathBuf};

/// Finds server binaries and starts clients for them.
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    /// Location of `command`, or `None` if it cannot be run.
    fn resolve(&self, command: &str) -> Option<PathBuf>;

    /// Start `server` for `language` in `root` and complete the initialize handshake.
    async fn launch(
        &self,
        server: &ServerDefinition,
        language: &str,
        root: &Path,
        options: ClientOptions,
    ) -> codenav_client::Result<LspClient>;
}

/// Launches real subprocesses found on PATH.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

#[async_trait]
impl ServerLauncher for ProcessLauncher {
    fn resolve(&self, command: &str) -> Option<PathBuf> {
        which::which(command).ok()
    }

    async fn launch(
        &self,
        server: &ServerDefinition,
        language: &str,
        root: &Path,
        options: ClientOptions,
    ) -> codenav_client::Result<LspClient> {
        LspClient::spawn(&server.command, &server.args, root, language, options).await
    }
}
