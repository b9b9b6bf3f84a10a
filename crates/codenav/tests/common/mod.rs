// Shared fixtures: a launcher that starts mock servers instead of processes

#![allow(dead_code)]

use async_trait::async_trait;
use codenav::{LspConfig, LspManager, ServerDefinition, ServerLauncher};
use codenav_client::mock::{MockHandle, MockLspServer};
use codenav_client::{ClientOptions, LspClient, ResponseError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Configure = Box<dyn Fn(MockLspServer) -> MockLspServer + Send + Sync>;

#[derive(Default)]
pub struct FakeLauncher {
    spawns: AtomicUsize,
    commands: Mutex<Vec<String>>,
    handles: Mutex<Vec<MockHandle>>,
    /// Commands that do not resolve.
    missing: Vec<String>,
    /// Commands whose server rejects `shutdown`.
    failing_shutdown: Vec<String>,
    startup_delay: Duration,
    /// Per-command startup delays that override `startup_delay`.
    slow: Vec<(String, Duration)>,
    configure: Option<Configure>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            startup_delay: Duration::from_millis(50),
            ..Default::default()
        }
    }

    pub fn serving<F>(configure: F) -> Self
    where
        F: Fn(MockLspServer) -> MockLspServer + Send + Sync + 'static,
    {
        Self {
            configure: Some(Box::new(configure)),
            ..Self::new()
        }
    }

    pub fn missing(mut self, commands: &[&str]) -> Self {
        self.missing = commands.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn failing_shutdown(mut self, commands: &[&str]) -> Self {
        self.failing_shutdown = commands.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn slow_start(mut self, commands: &[&str], delay: Duration) -> Self {
        self.slow
            .extend(commands.iter().map(|c| (c.to_string(), delay)));
        self
    }

    pub fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Simulate every running server exiting.
    pub fn kill_all(&self) {
        self.handles.lock().unwrap().clear();
    }
}

#[async_trait]
impl ServerLauncher for FakeLauncher {
    fn resolve(&self, command: &str) -> Option<PathBuf> {
        if self.missing.iter().any(|m| m == command) {
            None
        } else {
            Some(PathBuf::from("/usr/bin").join(command))
        }
    }

    async fn launch(
        &self,
        server: &ServerDefinition,
        language: &str,
        root: &Path,
        options: ClientOptions,
    ) -> codenav_client::Result<LspClient> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        self.commands.lock().unwrap().push(server.command.clone());
        let delay = self
            .slow
            .iter()
            .find(|(command, _)| *command == server.command)
            .map_or(self.startup_delay, |(_, delay)| *delay);
        tokio::time::sleep(delay).await;

        let mut mock = MockLspServer::new();
        if self.failing_shutdown.contains(&server.command) {
            mock = mock.on_request("shutdown", |_| {
                Err(ResponseError {
                    code: -32603,
                    message: "shutdown refused".to_string(),
                    data: None,
                })
            });
        }
        if let Some(configure) = &self.configure {
            mock = configure(mock);
        }

        let (transport, handle) = mock.start();
        self.handles.lock().unwrap().push(handle);
        LspClient::connect(transport, language, root, options).await
    }
}

pub fn test_options() -> ClientOptions {
    ClientOptions {
        request_timeout: Duration::from_secs(2),
        diagnostics_grace: Duration::from_millis(100),
        shutdown_timeout: Duration::from_millis(500),
        initialization_options: None,
    }
}

pub fn manager(config: LspConfig, root: &Path, launcher: Arc<FakeLauncher>) -> LspManager {
    LspManager::with_launcher(config, root, launcher).with_client_options(test_options())
}
