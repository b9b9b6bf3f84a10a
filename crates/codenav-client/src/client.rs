//! One language server: its process, its connection, and the documents it has open.

use crate::diagnostics::DiagnosticsCache;
use crate::process::ServerProcess;
use crate::protocol::{
    self, path_to_uri, to_position, uri_to_path, DiagnosticResult, LocationResult, SymbolResult,
};
use crate::transport::Transport;
use crate::{LspError, Result};
use lsp_types::{
    ClientCapabilities, ClientInfo, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DocumentSymbolClientCapabilities, DocumentSymbolParams, DynamicRegistrationClientCapabilities,
    GotoCapability, GotoDefinitionParams, HoverClientCapabilities, HoverParams, InitializeParams,
    InitializedParams, MarkupKind, PartialResultParams, PublishDiagnosticsClientCapabilities,
    PublishDiagnosticsParams, ReferenceContext, ReferenceParams, TextDocumentClientCapabilities,
    TextDocumentIdentifier, TextDocumentItem, TextDocumentPositionParams,
    TextDocumentSyncClientCapabilities, Url, WorkDoneProgressParams, WorkspaceClientCapabilities,
    WorkspaceFolder, WorkspaceSymbolClientCapabilities, WorkspaceSymbolParams,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub request_timeout: Duration,
    /// How long `get_diagnostics` waits for the server to publish after opening a file.
    pub diagnostics_grace: Duration,
    /// Bound on each step of the shutdown handshake and on waiting for the process to exit.
    pub shutdown_timeout: Duration,
    pub initialization_options: Option<Value>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            diagnostics_grace: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(2),
            initialization_options: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Created,
    Initializing,
    Ready,
    Closed,
}

pub struct LspClient {
    transport: Transport,
    process: AsyncMutex<Option<ServerProcess>>,
    command: String,
    language: String,
    root: PathBuf,
    options: ClientOptions,
    state: RwLock<ClientState>,
    diagnostics: Arc<DiagnosticsCache>,
    // Held across the didOpen write so no request for a document can overtake it.
    open_docs: AsyncRwLock<HashMap<Url, i32>>,
}

impl std::fmt::Debug for LspClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LspClient")
            .field("command", &self.command)
            .field("language", &self.language)
            .field("root", &self.root)
            .field("state", &self.state())
            .finish()
    }
}

impl LspClient {
    /// Launch `command` in `root` and complete the initialize handshake.
    pub async fn spawn(
        command: &str,
        args: &[String],
        root: &Path,
        language: &str,
        options: ClientOptions,
    ) -> Result<Self> {
        let (process, stdin, stdout) = ServerProcess::spawn(command, args, root)?;
        let transport = Transport::new(stdout, stdin);
        Self::start(transport, Some(process), command, language, root, options).await
    }

    /// Initialize a server reachable over an existing transport.
    pub async fn connect(
        transport: Transport,
        language: &str,
        root: &Path,
        options: ClientOptions,
    ) -> Result<Self> {
        Self::start(transport, None, language, language, root, options).await
    }

    async fn start(
        transport: Transport,
        process: Option<ServerProcess>,
        command: &str,
        language: &str,
        root: &Path,
        options: ClientOptions,
    ) -> Result<Self> {
        let client = Self {
            transport,
            process: AsyncMutex::new(process),
            command: command.to_string(),
            language: language.to_string(),
            root: root.to_path_buf(),
            options,
            state: RwLock::new(ClientState::Created),
            diagnostics: Arc::new(DiagnosticsCache::new()),
            open_docs: AsyncRwLock::new(HashMap::new()),
        };

        let cache = client.diagnostics.clone();
        client
            .transport
            .on_notification("textDocument/publishDiagnostics", move |params| {
                match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                    Ok(params) => {
                        debug!(
                            "{} diagnostic(s) for {}",
                            params.diagnostics.len(),
                            params.uri
                        );
                        cache.publish(params);
                    }
                    Err(e) => warn!("ignoring malformed publishDiagnostics: {}", e),
                }
            });

        if let Err(e) = client.initialize().await {
            warn!("{} failed to initialize: {}", command, e);
            let _ = client.close().await;
            return Err(LspError::Initialize {
                command: command.to_string(),
                source: Box::new(e),
            });
        }

        Ok(client)
    }

    async fn initialize(&self) -> Result<()> {
        self.set_state(ClientState::Initializing);

        let root_uri = path_to_uri(&self.root)?;
        let root_name = self
            .root
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("workspace")
            .to_string();

        debug!("initializing {} with root {}", self.command, root_uri);

        #[allow(deprecated)]
        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_path: Some(self.root.to_string_lossy().into_owned()),
            root_uri: Some(root_uri.clone()),
            initialization_options: self.options.initialization_options.clone(),
            capabilities: client_capabilities(),
            workspace_folders: Some(vec![WorkspaceFolder {
                uri: root_uri,
                name: root_name,
            }]),
            client_info: Some(ClientInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            ..Default::default()
        };

        // Capabilities are not consulted, so the result is not decoded.
        self.transport
            .call_with_timeout("initialize", params, self.options.request_timeout)
            .await?;
        self.transport
            .notify("initialized", InitializedParams {})
            .await?;

        self.set_state(ClientState::Ready);
        info!("{} ready for {}", self.command, self.language);
        Ok(())
    }

    pub fn state(&self) -> ClientState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Initialized and still connected.
    pub fn is_ready(&self) -> bool {
        self.state() == ClientState::Ready && !self.transport.is_closed()
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn set_state(&self, state: ClientState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub async fn is_open(&self, path: &Path) -> bool {
        match path_to_uri(path) {
            Ok(uri) => self.open_docs.read().await.contains_key(&uri),
            Err(_) => false,
        }
    }

    /// Send `didOpen` for `path` unless it is already open.
    pub async fn open_file(&self, path: &Path) -> Result<()> {
        self.ensure_open(path).await.map(|_| ())
    }

    /// Send `didClose` for `path` if it is open.
    pub async fn close_file(&self, path: &Path) -> Result<()> {
        let uri = path_to_uri(path)?;
        let mut open_docs = self.open_docs.write().await;
        if open_docs.remove(&uri).is_none() {
            return Ok(());
        }

        let params = DidCloseTextDocumentParams {
            text_document: TextDocumentIdentifier { uri },
        };
        self.transport.notify("textDocument/didClose", params).await
    }

    async fn ensure_open(&self, path: &Path) -> Result<Url> {
        let uri = path_to_uri(path)?;
        if self.open_docs.read().await.contains_key(&uri) {
            return Ok(uri);
        }

        let mut open_docs = self.open_docs.write().await;
        if open_docs.contains_key(&uri) {
            return Ok(uri);
        }

        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| LspError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;

        let version = 1;
        let params = DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: uri.clone(),
                language_id: self.language.clone(),
                version,
                text,
            },
        };
        self.transport.notify("textDocument/didOpen", params).await?;
        open_docs.insert(uri.clone(), version);

        debug!("opened {} in {}", path.display(), self.command);
        Ok(uri)
    }

    /// Validate the caller's coordinates, then make sure the document is open.
    async fn position_params(
        &self,
        path: &Path,
        line: u32,
        column: u32,
    ) -> Result<TextDocumentPositionParams> {
        let position = to_position(line, column)?;
        let uri = self.ensure_open(path).await?;
        Ok(TextDocumentPositionParams::new(
            TextDocumentIdentifier::new(uri),
            position,
        ))
    }

    async fn call<P: Serialize>(&self, method: &str, params: P) -> Result<Value> {
        self.transport
            .call_with_timeout(method, params, self.options.request_timeout)
            .await
    }

    pub async fn definition(
        &self,
        path: &Path,
        line: u32,
        column: u32,
    ) -> Result<Vec<LocationResult>> {
        let params = GotoDefinitionParams {
            text_document_position_params: self.position_params(path, line, column).await?,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let raw = self.call("textDocument/definition", params).await?;
        Ok(protocol::parse_locations(raw))
    }

    pub async fn references(
        &self,
        path: &Path,
        line: u32,
        column: u32,
        include_declaration: bool,
    ) -> Result<Vec<LocationResult>> {
        let params = ReferenceParams {
            text_document_position: self.position_params(path, line, column).await?,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            context: ReferenceContext {
                include_declaration,
            },
        };
        let raw = self.call("textDocument/references", params).await?;
        Ok(protocol::parse_locations(raw))
    }

    /// Hover text at the position; empty when the server has none.
    pub async fn hover(&self, path: &Path, line: u32, column: u32) -> Result<String> {
        let params = HoverParams {
            text_document_position_params: self.position_params(path, line, column).await?,
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let raw = self.call("textDocument/hover", params).await?;
        Ok(protocol::parse_hover(raw))
    }

    pub async fn document_symbols(&self, path: &Path) -> Result<Vec<SymbolResult>> {
        let uri = self.ensure_open(path).await?;
        let file = uri_to_path(&uri);
        let params = DocumentSymbolParams {
            text_document: TextDocumentIdentifier::new(uri),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let raw = self.call("textDocument/documentSymbol", params).await?;
        Ok(protocol::parse_document_symbols(raw, &file))
    }

    /// Search symbols across the workspace. Needs no open document.
    pub async fn workspace_symbols(&self, query: &str) -> Result<Vec<SymbolResult>> {
        let params = WorkspaceSymbolParams {
            query: query.to_string(),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let raw = self.call("workspace/symbol", params).await?;
        Ok(protocol::parse_workspace_symbols(raw))
    }

    /// Diagnostics the server has published for `path`.
    ///
    /// Opens the file if needed and then waits `diagnostics_grace` for analysis to land.
    /// There is no readiness signal in the protocol, so a slow server may publish after
    /// this returns. No diagnostics is an empty list, not an error.
    pub async fn get_diagnostics(&self, path: &Path) -> Result<Vec<DiagnosticResult>> {
        let uri = self.ensure_open(path).await?;
        tokio::time::sleep(self.options.diagnostics_grace).await;

        let file = uri_to_path(&uri);
        Ok(self
            .diagnostics
            .get(&uri)
            .iter()
            .map(|diagnostic| DiagnosticResult::new(file.clone(), diagnostic))
            .collect())
    }

    /// Shut the server down: `shutdown` request, `exit` notification, close the pipes,
    /// wait for the process and kill it if it lingers. Every step runs even when an
    /// earlier one fails. Calling this again is a no-op.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            if *state == ClientState::Closed {
                return Ok(());
            }
            *state = ClientState::Closed;
        }

        let timeout = self.options.shutdown_timeout;
        let mut outcome = Ok(());

        if !self.transport.is_closed() {
            match self
                .transport
                .call_with_timeout("shutdown", Value::Null, timeout)
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_closed() => debug!("{} went away before shutdown", self.command),
                Err(e) => {
                    warn!("{} shutdown request failed: {}", self.command, e);
                    outcome = Err(e);
                }
            }
            if let Err(e) = self.transport.notify("exit", Value::Null).await {
                debug!("{} exit notification not sent: {}", self.command, e);
            }
        }

        self.transport.close().await;
        self.open_docs.write().await.clear();

        if let Some(process) = self.process.lock().await.take() {
            process.terminate(timeout).await;
        }

        info!("closed {} for {}", self.command, self.language);
        outcome
    }
}

/// Capabilities for the features this client models.
fn client_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        text_document: Some(TextDocumentClientCapabilities {
            synchronization: Some(TextDocumentSyncClientCapabilities {
                did_save: Some(true),
                ..Default::default()
            }),
            hover: Some(HoverClientCapabilities {
                content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
                ..Default::default()
            }),
            definition: Some(GotoCapability {
                link_support: Some(true),
                ..Default::default()
            }),
            references: Some(DynamicRegistrationClientCapabilities {
                dynamic_registration: Some(false),
            }),
            document_symbol: Some(DocumentSymbolClientCapabilities {
                hierarchical_document_symbol_support: Some(true),
                ..Default::default()
            }),
            publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
                related_information: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }),
        workspace: Some(WorkspaceClientCapabilities {
            apply_edit: Some(false),
            symbol: Some(WorkspaceSymbolClientCapabilities {
                dynamic_registration: Some(false),
                ..Default::default()
            }),
            workspace_folders: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}
