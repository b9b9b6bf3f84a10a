//! Scriptable in-process language server for tests.
//!
//! The server runs over `tokio::io::duplex`, answers requests from registered handlers,
//! records every message it receives, and can push notifications to the client.

use crate::codec::{encode_frame, read_frame};
use crate::message::{ErrorCode, Message, Notification, Response, ResponseError};
use crate::transport::Transport;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{duplex, split, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub type RequestHandler =
    Arc<dyn Fn(Value) -> std::result::Result<Value, ResponseError> + Send + Sync>;
/// Reacts to a client notification, optionally pushing one back.
pub type NotificationHook = Arc<dyn Fn(Value) -> Option<Notification> + Send + Sync>;

const PIPE_CAPACITY: usize = 1024 * 1024;

pub struct MockLspServer {
    handlers: HashMap<String, RequestHandler>,
    hooks: HashMap<String, NotificationHook>,
    delays: HashMap<String, Duration>,
}

impl Default for MockLspServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLspServer {
    /// A server that answers `initialize` and `shutdown`. Other requests get
    /// `MethodNotFound` until a handler is registered.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            hooks: HashMap::new(),
            delays: HashMap::new(),
        }
        .on_request_simple(
            "initialize",
            json!({
                "capabilities": {
                    "definitionProvider": true,
                    "referencesProvider": true,
                    "hoverProvider": true,
                    "documentSymbolProvider": true,
                    "workspaceSymbolProvider": true
                },
                "serverInfo": {"name": "mock-lsp", "version": "1.0.0"}
            }),
        )
        .on_request_simple("shutdown", Value::Null)
    }

    /// Answer `method` with whatever `handler` returns for the request params.
    pub fn on_request<F>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(Value) -> std::result::Result<Value, ResponseError> + Send + Sync + 'static,
    {
        self.handlers.insert(method.to_string(), Arc::new(handler));
        self
    }

    /// Answer `method` with a fixed result.
    pub fn on_request_simple(self, method: &str, result: Value) -> Self {
        self.on_request(method, move |_| Ok(result.clone()))
    }

    /// Run `hook` for every `method` notification from the client, e.g. to publish
    /// diagnostics when a document is opened.
    pub fn on_notification<F>(mut self, method: &str, hook: F) -> Self
    where
        F: Fn(Value) -> Option<Notification> + Send + Sync + 'static,
    {
        self.hooks.insert(method.to_string(), Arc::new(hook));
        self
    }

    /// Hold every response to `method` for `delay`. Other traffic keeps flowing.
    pub fn with_delay(mut self, method: &str, delay: Duration) -> Self {
        self.delays.insert(method.to_string(), delay);
        self
    }

    /// Start serving and return a client-side transport connected to it.
    pub fn start(self) -> (Transport, MockHandle) {
        let (client_side, server_side) = duplex(PIPE_CAPACITY);
        let (client_reader, client_writer) = split(client_side);
        let (server_reader, mut server_writer) = split(server_side);

        let received = Arc::new(Mutex::new(Vec::new()));
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let writer_task = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let Ok(body) = serde_json::to_vec(&message) else {
                    continue;
                };
                if server_writer.write_all(&encode_frame(&body)).await.is_err() {
                    break;
                }
            }
        });

        let reader_task = tokio::spawn(serve(
            BufReader::new(server_reader),
            self.handlers,
            self.hooks,
            self.delays,
            received.clone(),
            outbound_tx.clone(),
        ));

        let handle = MockHandle {
            received,
            outbound: outbound_tx,
            tasks: vec![reader_task, writer_task],
        };
        (Transport::new(client_reader, client_writer), handle)
    }
}

async fn serve<R>(
    mut reader: BufReader<R>,
    handlers: HashMap<String, RequestHandler>,
    hooks: HashMap<String, NotificationHook>,
    delays: HashMap<String, Duration>,
    received: Arc<Mutex<Vec<Message>>>,
    outbound: mpsc::UnboundedSender<Message>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    while let Ok(Some(body)) = read_frame(&mut reader).await {
        let Ok(message) = serde_json::from_str::<Message>(&body) else {
            continue;
        };
        received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());

        let request = match message {
            Message::Request(request) => request,
            Message::Notification(notification) => {
                if let Some(hook) = hooks.get(&notification.method) {
                    if let Some(reply) = hook(notification.params) {
                        let _ = outbound.send(Message::Notification(reply));
                    }
                }
                continue;
            }
            Message::Response(_) => continue,
        };
        debug!("mock server got {} #{}", request.method, request.id);

        let response = match handlers.get(&request.method) {
            Some(handler) => match handler(request.params) {
                Ok(result) => Response::ok(request.id, result),
                Err(error) => Response::err(request.id, error),
            },
            None => Response::err(
                request.id,
                ResponseError::new(
                    ErrorCode::MethodNotFound,
                    format!("Method not found: {}", request.method),
                ),
            ),
        };

        match delays.get(&request.method) {
            Some(delay) => {
                let delay = *delay;
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = outbound.send(Message::Response(response));
                });
            }
            None => {
                let _ = outbound.send(Message::Response(response));
            }
        }
    }
}

/// Test-side view of a running mock server.
pub struct MockHandle {
    received: Arc<Mutex<Vec<Message>>>,
    outbound: mpsc::UnboundedSender<Message>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockHandle {
    /// Every message received so far, in arrival order.
    pub fn received(&self) -> Vec<Message> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Methods of received requests and notifications, in arrival order.
    pub fn methods(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .filter_map(|message| match message {
                Message::Request(request) => Some(request.method),
                Message::Notification(notification) => Some(notification.method),
                Message::Response(_) => None,
            })
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.methods().iter().filter(|m| *m == method).count()
    }

    /// Params of the first message received for `method`.
    pub fn params_of(&self, method: &str) -> Option<Value> {
        self.received()
            .into_iter()
            .find_map(|message| match message {
                Message::Request(request) if request.method == method => Some(request.params),
                Message::Notification(notification) if notification.method == method => {
                    Some(notification.params)
                }
                _ => None,
            })
    }

    /// Push a notification to the client.
    pub fn notify(&self, method: &str, params: Value) {
        let _ = self
            .outbound
            .send(Message::Notification(Notification::new(method, params)));
    }

    /// Poll until `method` has been received or `timeout` passes.
    pub async fn wait_for(&self, method: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count(method) > 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
