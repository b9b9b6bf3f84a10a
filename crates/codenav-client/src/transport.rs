//! JSON-RPC connection over a pair of byte streams.
//!
//! One reader task owns the inbound stream for the lifetime of the connection. Outbound
//! messages go through a single writer lock so concurrently encoded frames never
//! interleave. Requests are correlated to responses through a pending map keyed by the
//! numeric id this transport allocated.

use crate::codec::{encode_frame, read_frame};
use crate::message::{Message, Notification, Request, RequestId, Response, ResponseError};
use crate::{LspError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Callback for a server notification.
pub type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync>;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type Reply = std::result::Result<Value, ResponseError>;
type PendingSender = oneshot::Sender<Reply>;

const WRITER_RELEASE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Transport {
    shared: Arc<Shared>,
    writer: AsyncMutex<Option<BoxedWriter>>,
    next_id: AtomicI64,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

/// State touched by both callers and the reader task.
struct Shared {
    closed: AtomicBool,
    pending: Mutex<HashMap<i64, PendingSender>>,
    /// One queue per method, each drained in arrival order by its own worker task.
    handlers: RwLock<HashMap<String, mpsc::UnboundedSender<Value>>>,
}

/// Removes a pending entry when the waiting call finishes or is dropped mid-wait.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: i64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.take_pending(self.id);
    }
}

impl Transport {
    /// Start a connection over `reader`/`writer`. Must be called inside a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
        });

        let reader_task = tokio::spawn(read_loop(BufReader::new(reader), shared.clone()));

        Self {
            shared,
            writer: AsyncMutex::new(Some(Box::new(writer))),
            next_id: AtomicI64::new(1),
            reader_task: Mutex::new(Some(reader_task)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Send a request and wait for its response, the connection closing, or the
    /// returned future being dropped.
    pub async fn call<P: Serialize>(&self, method: &str, params: P) -> Result<Value> {
        if self.is_closed() {
            return Err(LspError::TransportClosed);
        }

        let params = serde_json::to_value(params).map_err(|source| LspError::Marshal {
            method: method.to_string(),
            source,
        })?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let response_rx = self.shared.register(id)?;
        let _guard = PendingGuard {
            shared: &*self.shared,
            id,
        };

        debug!("--> {} #{}", method, id);
        self.write(Message::Request(Request::new(id, method, params)))
            .await?;

        match response_rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(LspError::Protocol {
                method: method.to_string(),
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            Err(_) => Err(LspError::TransportClosed),
        }
    }

    /// `call` bounded by `timeout`. A response arriving after the deadline is dropped.
    pub async fn call_with_timeout<P: Serialize>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> Result<Value> {
        match tokio::time::timeout(timeout, self.call(method, params)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} timed out after {:?}", method, timeout);
                Err(LspError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Send a notification. Only a failed write is reported.
    pub async fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
        if self.is_closed() {
            return Err(LspError::TransportClosed);
        }

        let params = serde_json::to_value(params).map_err(|source| LspError::Marshal {
            method: method.to_string(),
            source,
        })?;

        debug!("--> {}", method);
        self.write(Message::Notification(Notification::new(method, params)))
            .await
    }

    /// Register the handler for `method`, replacing any previous one.
    ///
    /// Notifications of one method reach the handler one at a time, in the order the
    /// server sent them. Different methods are handled concurrently. Must be called
    /// inside a tokio runtime.
    pub fn on_notification<F>(&self, method: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let handler: NotificationHandler = Arc::new(handler);
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        tokio::spawn(async move {
            while let Some(params) = rx.recv().await {
                handler(params);
            }
        });

        // Dropping the previous sender lets its worker finish what is queued and exit.
        let mut handlers = self
            .shared
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner());
        handlers.insert(method.to_string(), tx);
    }

    /// Close the connection. Pending calls fail with `TransportClosed`; later calls fail
    /// immediately. Safe to call more than once.
    pub async fn close(&self) {
        self.shared.shutdown();

        let reader_task = self
            .reader_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = reader_task {
            task.abort();
        }

        // A write stuck on a full pipe must not hold up close; the writer is then
        // released when the transport is dropped.
        match tokio::time::timeout(WRITER_RELEASE_TIMEOUT, self.writer.lock()).await {
            Ok(mut writer) => {
                if let Some(mut stream) = writer.take() {
                    let _ = stream.shutdown().await;
                }
            }
            Err(_) => warn!("writer busy, deferring stream release"),
        }
    }

    async fn write(&self, message: Message) -> Result<()> {
        let body = serde_json::to_vec(&message).map_err(|source| LspError::Marshal {
            method: message_method(&message).to_string(),
            source,
        })?;
        let frame = encode_frame(&body);

        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or(LspError::TransportClosed)?;
        stream.write_all(&frame).await?;
        stream.flush().await?;
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shared.shutdown();
        if let Some(task) = self
            .reader_task
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }
}

impl Shared {
    fn register(&self, id: i64) -> Result<oneshot::Receiver<Reply>> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        // Checked under the lock so a concurrent shutdown cannot miss this entry.
        if self.closed.load(Ordering::SeqCst) {
            return Err(LspError::TransportClosed);
        }
        pending.insert(id, tx);
        Ok(rx)
    }

    fn take_pending(&self, id: i64) -> Option<PendingSender> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
    }

    /// Flip the closed flag and fail every waiting call by dropping its sender.
    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Workers finish what is already queued, then exit.
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        let drained: Vec<PendingSender> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().map(|(_, tx)| tx).collect()
        };
        if !drained.is_empty() {
            debug!("failing {} pending request(s) on close", drained.len());
        }
    }

    fn route(&self, message: Message) {
        match message {
            Message::Response(response) => self.deliver(response),
            Message::Notification(notification) => self.dispatch(notification),
            Message::Request(request) => {
                warn!(
                    "ignoring server request {} #{}: server-initiated calls are not supported",
                    request.method, request.id
                );
            }
        }
    }

    fn deliver(&self, response: Response) {
        let outcome = match (response.result, response.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => {
                warn!("dropping response #{} with neither result nor error", response.id);
                return;
            }
        };

        let id = match response.id {
            RequestId::Number(id) => id,
            RequestId::String(_) => {
                warn!("dropping response with non-numeric id {}", response.id);
                return;
            }
        };

        match self.take_pending(id) {
            Some(tx) => {
                debug!("<-- response #{}", id);
                let _ = tx.send(outcome);
            }
            None => debug!("dropping response #{}: no caller waiting", id),
        }
    }

    fn dispatch(&self, notification: Notification) {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        match handlers.get(&notification.method) {
            Some(queue) => {
                debug!("<-- {}", notification.method);
                if queue.send(notification.params).is_err() {
                    warn!("{} handler is gone", notification.method);
                }
            }
            None => debug!("ignoring unhandled notification {}", notification.method),
        }
    }
}

async fn read_loop<R>(mut reader: BufReader<R>, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    while !shared.closed.load(Ordering::SeqCst) {
        match read_frame(&mut reader).await {
            Ok(Some(body)) => match serde_json::from_str::<Message>(&body) {
                Ok(message) => shared.route(message),
                Err(e) => warn!("skipping undecodable message: {}", e),
            },
            Ok(None) => {
                debug!("language server closed its output stream");
                break;
            }
            Err(e) if e.is_recoverable() => warn!("skipping malformed frame: {}", e),
            Err(e) => {
                warn!("read loop stopped: {}", e);
                break;
            }
        }
    }
    shared.shutdown();
}

fn message_method(message: &Message) -> &str {
    match message {
        Message::Request(request) => &request.method,
        Message::Notification(notification) => &notification.method,
        Message::Response(_) => "response",
    }
}
