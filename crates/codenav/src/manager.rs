//! Language to client registry.
//!
//! Clients are started on first use and shared through `Arc`, so a request never holds
//! the registry lock while it talks to a server. Startup holds only a per-language gate,
//! so a slow server does not stall lookups for other languages.

use crate::config::{LspConfig, ServerDefinition};
use crate::language::{self, BUILTIN_SERVERS};
use crate::launcher::{ProcessLauncher, ServerLauncher};
use crate::{ManagerError, Result};
use codenav_client::{ClientOptions, DiagnosticResult, LocationResult, LspClient, SymbolResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolScope {
    #[default]
    File,
    Workspace,
}

pub struct LspManager {
    config: LspConfig,
    root: PathBuf,
    startup_timeout: Duration,
    client_options: ClientOptions,
    launcher: Arc<dyn ServerLauncher>,
    clients: RwLock<HashMap<String, Arc<LspClient>>>,
    starting: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LspManager {
    pub fn new(config: LspConfig, root: impl Into<PathBuf>) -> Self {
        Self::with_launcher(config, root, Arc::new(ProcessLauncher))
    }

    pub fn with_launcher(
        config: LspConfig,
        root: impl Into<PathBuf>,
        launcher: Arc<dyn ServerLauncher>,
    ) -> Self {
        let startup_timeout = config.startup_timeout();
        Self {
            config,
            root: root.into(),
            startup_timeout,
            client_options: ClientOptions::default(),
            launcher,
            clients: RwLock::new(HashMap::new()),
            starting: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Override the per-client timeouts used for every server started from now on.
    pub fn with_client_options(mut self, options: ClientOptions) -> Self {
        self.client_options = options;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn detect_language(&self, path: &Path) -> Option<&'static str> {
        language::detect_language(path)
    }

    /// The server for `language`: the first user definition listing it, else the
    /// built-in default.
    pub fn server_config(&self, language: &str) -> Option<ServerDefinition> {
        self.config
            .servers
            .values()
            .find(|server| server.handles(language))
            .cloned()
            .or_else(|| language::builtin_server(language).map(|server| server.definition()))
    }

    pub async fn get_client(&self, path: &Path) -> Result<Arc<LspClient>> {
        let language = self
            .detect_language(path)
            .ok_or_else(|| ManagerError::UnknownLanguage {
                path: path.to_path_buf(),
            })?;
        self.get_client_for_language(language).await
    }

    /// The Ready client for `language`, starting one if needed. Concurrent first calls
    /// start a single server.
    pub async fn get_client_for_language(&self, language: &str) -> Result<Arc<LspClient>> {
        if !self.config.enabled {
            return Err(ManagerError::Disabled);
        }

        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(language) {
                if client.is_ready() {
                    return Ok(client.clone());
                }
            }
        }

        let gate = self.startup_gate(language);
        let _starting = gate.lock().await;

        let stale = {
            let clients = self.clients.read().await;
            match clients.get(language) {
                Some(client) if client.is_ready() => return Ok(client.clone()),
                Some(_) => true,
                None => false,
            }
        };

        let server = self
            .server_config(language)
            .ok_or_else(|| ManagerError::NoServerConfigured {
                language: language.to_string(),
            })?;
        if !server.enabled {
            return Err(ManagerError::ServerDisabled {
                language: language.to_string(),
            });
        }
        if self.launcher.resolve(&server.command).is_none() {
            return Err(ManagerError::BinaryNotFound {
                command: server.command.clone(),
                language: language.to_string(),
            });
        }

        if stale {
            let removed = self.clients.write().await.remove(language);
            if let Some(client) = removed {
                warn!("{} server is no longer ready, restarting", language);
                if let Err(e) = client.close().await {
                    debug!("closing stale {} server: {}", language, e);
                }
            }
        }

        let options = ClientOptions {
            initialization_options: server.init_options.clone(),
            ..self.client_options.clone()
        };

        info!("starting {} for {}", server.command, language);
        let launch = self.launcher.launch(&server, language, &self.root, options);
        let client = match tokio::time::timeout(self.startup_timeout, launch).await {
            Ok(Ok(client)) => Arc::new(client),
            Ok(Err(source)) => {
                return Err(ManagerError::Start {
                    language: language.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(ManagerError::StartupTimeout {
                    language: language.to_string(),
                    timeout: self.startup_timeout,
                })
            }
        };

        self.clients
            .write()
            .await
            .insert(language.to_string(), client.clone());
        Ok(client)
    }

    /// Serialises startups of one language without blocking other languages or the
    /// read path.
    fn startup_gate(&self, language: &str) -> Arc<Mutex<()>> {
        let mut starting = self
            .starting
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        starting.entry(language.to_string()).or_default().clone()
    }

    pub async fn definition(
        &self,
        path: &Path,
        line: u32,
        column: u32,
    ) -> Result<Vec<LocationResult>> {
        let client = self.get_client(path).await?;
        client
            .definition(path, line, column)
            .await
            .map_err(|source| client_error(&client, path, source))
    }

    /// References including the declaration itself.
    pub async fn references(
        &self,
        path: &Path,
        line: u32,
        column: u32,
    ) -> Result<Vec<LocationResult>> {
        let client = self.get_client(path).await?;
        client
            .references(path, line, column, true)
            .await
            .map_err(|source| client_error(&client, path, source))
    }

    pub async fn hover(&self, path: &Path, line: u32, column: u32) -> Result<String> {
        let client = self.get_client(path).await?;
        client
            .hover(path, line, column)
            .await
            .map_err(|source| client_error(&client, path, source))
    }

    pub async fn diagnostics(&self, path: &Path) -> Result<Vec<DiagnosticResult>> {
        let client = self.get_client(path).await?;
        client
            .get_diagnostics(path)
            .await
            .map_err(|source| client_error(&client, path, source))
    }

    /// Symbols of `path`, or every symbol the file's server knows about when `scope` is
    /// `Workspace`.
    pub async fn symbols(&self, path: &Path, scope: SymbolScope) -> Result<Vec<SymbolResult>> {
        let client = self.get_client(path).await?;
        let result = match scope {
            SymbolScope::File => client.document_symbols(path).await,
            SymbolScope::Workspace => client.workspace_symbols("").await,
        };
        result.map_err(|source| client_error(&client, path, source))
    }

    /// Workspace symbol search on the server for `path`'s language.
    pub async fn workspace_symbols(&self, path: &Path, query: &str) -> Result<Vec<SymbolResult>> {
        let client = self.get_client(path).await?;
        client
            .workspace_symbols(query)
            .await
            .map_err(|source| client_error(&client, path, source))
    }

    /// Names of servers that could be started right now.
    pub fn available_servers(&self) -> Vec<String> {
        let builtin = BUILTIN_SERVERS
            .iter()
            .filter(|server| self.launcher.resolve(server.command).is_some())
            .map(|server| server.name.to_string());
        let configured = self
            .config
            .servers
            .iter()
            .filter(|(_, server)| {
                server.enabled && self.launcher.resolve(&server.command).is_some()
            })
            .map(|(name, _)| name.clone());
        builtin.chain(configured).collect()
    }

    pub async fn active_languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self.clients.read().await.keys().cloned().collect();
        languages.sort();
        languages
    }

    /// Close every client. All of them are closed even if some fail; the failures are
    /// reported together.
    pub async fn shutdown(&self) -> Result<()> {
        let clients: Vec<(String, Arc<LspClient>)> = {
            let mut clients = self.clients.write().await;
            clients.drain().collect()
        };

        let mut failures = Vec::new();
        for (language, client) in clients {
            match client.close().await {
                Ok(()) => info!("shut down {} server", language),
                Err(e) => {
                    warn!("failed to shut down {} server: {}", language, e);
                    failures.push(format!("{}: {}", language, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            failures.sort();
            Err(ManagerError::Shutdown(failures))
        }
    }
}

fn client_error(
    client: &LspClient,
    path: &Path,
    source: codenav_client::LspError,
) -> ManagerError {
    ManagerError::Client {
        language: client.language().to_string(),
        path: path.to_path_buf(),
        source,
    }
}
