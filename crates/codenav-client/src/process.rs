//! Language server subprocess.

use crate::{LspError, Result};
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, error, info, warn};

/// A running server. The child is killed if this is dropped without `terminate`.
pub struct ServerProcess {
    command: String,
    child: Child,
}

impl ServerProcess {
    /// Launch `command args...` in `root` with piped stdio. Returns the process together
    /// with the stdin/stdout pair that carries JSON-RPC.
    pub fn spawn(
        command: &str,
        args: &[String],
        root: &Path,
    ) -> Result<(Self, ChildStdin, ChildStdout)> {
        let spawn_error = |source: io::Error| LspError::Spawn {
            command: command.to_string(),
            source,
        };

        let mut child = Command::new(command)
            .args(args)
            .current_dir(root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error(io::Error::other("stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(io::Error::other("stdout not captured")))?;

        if let Some(stderr) = child.stderr.take() {
            let name = command.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %name, "stderr: {}", line);
                }
            });
        }

        info!("started {} (pid {:?}) in {}", command, child.id(), root.display());

        Ok((
            Self {
                command: command.to_string(),
                child,
            },
            stdin,
            stdout,
        ))
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait up to `grace` for the process to exit on its own, then kill it.
    pub async fn terminate(mut self, grace: Duration) {
        tokio::select! {
            result = self.child.wait() => {
                match result {
                    Ok(status) => debug!("{} exited with {}", self.command, status),
                    Err(e) => warn!("error waiting for {} to exit: {}", self.command, e),
                }
            }
            _ = tokio::time::sleep(grace) => {
                warn!("{} did not exit within {:?}, killing", self.command, grace);
                if let Err(e) = self.child.kill().await {
                    error!("failed to kill {}: {}", self.command, e);
                }
            }
        }
    }
}
