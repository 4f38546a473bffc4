//! MCP client session.
//!
//! This module implements the client side of the MCP lifecycle:
//!
//! 1. **Initialisation**: `initialize` request, then `notifications/initialized`
//! 2. **Operation**: discovery and tool/prompt/resource requests
//! 3. **Shutdown**: close the outbound stream, wait for the server, kill it if needed
//!
//! # Correlation
//!
//! Every request gets a fresh numeric id and a oneshot completion slot in the
//! pending table. A single dispatch task reads frames from the server and
//! resolves the slot whose id matches each response, so concurrent callers
//! never see each other's results. When the transport closes, every slot that
//! is still pending is resolved with [`SessionError::SessionClosed`].
//!
//! The pending table and the session state share one lock: a request is only
//! registered while the session is open, and the dispatch task drains the
//! table in the same critical section that marks the session closed.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::mcp::error::{SessionError, SessionResult};
use crate::mcp::protocol::{
    decode, encode, DecodeError, ErrorObject, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, Message, RequestId, MCP_PROTOCOL_VERSION,
};
use crate::mcp::transport::{FrameReader, FrameWriter, ProcessHandle, ServerCommand, StdioTransport};
use crate::mcp::types::{
    CallToolResult, GetPromptResult, InitializeParams, InitializeResult, ListPromptsResult,
    ListResourcesResult, ListToolsResult, Prompt, ReadResourceResult, Resource, Tool,
};

/// Consecutive undecodable frames after which the stream is considered corrupt.
pub const MAX_CONSECUTIVE_DECODE_FAILURES: u32 = 3;

/// Upper bound on pages fetched for one `*/list` call.
const MAX_LIST_PAGES: usize = 64;

/// Session state in the MCP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport connected, handshake not started.
    Uninitialized,
    /// Initialize response received, `initialized` notification pending.
    Initializing,
    /// Ready for capability operations.
    Ready,
    /// Shutdown in progress.
    Closing,
    /// Transport closed. Terminal.
    Closed,
}

/// Receives notifications sent by the server.
///
/// Called from the dispatch task, so implementations must return quickly.
pub trait NotificationHandler: Send + Sync {
    /// Handles one notification.
    fn on_notification(&self, notification: JsonRpcNotification);
}

/// Default handler: logs and ignores.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreNotifications;

impl NotificationHandler for IgnoreNotifications {
    fn on_notification(&self, notification: JsonRpcNotification) {
        debug!(method = %notification.method, "Ignoring server notification");
    }
}

/// Timeouts that govern a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Per-request timeout for capability operations.
    pub request_timeout: Duration,
    /// Timeout for the initialize handshake.
    pub init_timeout: Duration,
    /// How long to wait for the server to exit before killing it.
    pub shutdown_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            init_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

type Reply = SessionResult<Value>;

struct Shared {
    state: SessionState,
    pending: HashMap<RequestId, oneshot::Sender<Reply>>,
}

type SharedState = Arc<Mutex<Shared>>;

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a pending slot when its caller stops waiting.
///
/// Covers timeouts and callers whose future is dropped mid-request. Removing
/// an id the dispatch task already resolved is a no-op.
struct PendingGuard<'a> {
    shared: &'a Mutex<Shared>,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if lock(self.shared).pending.remove(&self.id).is_some() {
            trace!(id = %self.id, "Removed abandoned pending request");
        }
    }
}

/// A live MCP session with one server.
pub struct Session {
    shared: SharedState,
    writer: Arc<AsyncMutex<FrameWriter>>,
    process: Arc<AsyncMutex<Option<ProcessHandle>>>,
    dispatcher: AsyncMutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    next_id: AtomicU64,
    settings: SessionSettings,
    server: OnceLock<InitializeResult>,
}

impl Session {
    /// Spawns the server, starts the session and performs the handshake.
    ///
    /// On handshake failure the server is shut down before returning.
    ///
    /// # Errors
    ///
    /// Returns `Spawn` if the process cannot start, or the handshake error.
    pub async fn connect(command: &ServerCommand, settings: SessionSettings) -> SessionResult<Self> {
        let transport = StdioTransport::spawn(command)?;
        let session = Self::start(transport, settings, Arc::new(IgnoreNotifications));

        if let Err(e) = session.initialize().await {
            warn!(error = %e, "Handshake failed, shutting down server");
            session.close().await;
            return Err(e);
        }

        Ok(session)
    }

    /// Starts a session over a transport and spawns its dispatch task.
    ///
    /// Must be called from within a Tokio runtime. The session starts
    /// `Uninitialized`; call [`Session::initialize`] before anything else.
    pub fn start(
        transport: StdioTransport,
        settings: SessionSettings,
        handler: Arc<dyn NotificationHandler>,
    ) -> Self {
        let (reader, writer, process) = transport.into_parts();

        let shared = Arc::new(Mutex::new(Shared {
            state: SessionState::Uninitialized,
            pending: HashMap::new(),
        }));
        let writer = Arc::new(AsyncMutex::new(writer));
        let process = Arc::new(AsyncMutex::new(process));
        let cancel = CancellationToken::new();

        let dispatcher = tokio::spawn(dispatch_loop(
            reader,
            Arc::clone(&shared),
            Arc::clone(&writer),
            Arc::clone(&process),
            handler,
            cancel.clone(),
            settings.shutdown_timeout,
        ));

        Self {
            shared,
            writer,
            process,
            dispatcher: AsyncMutex::new(Some(dispatcher)),
            cancel,
            next_id: AtomicU64::new(1),
            settings,
            server: OnceLock::new(),
        }
    }

    /// Returns the current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        lock(&self.shared).state
    }

    /// Server information from the handshake, once it has completed.
    #[must_use]
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server.get()
    }

    /// Number of requests currently awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        lock(&self.shared).pending.len()
    }

    /// Performs the initialize handshake.
    ///
    /// # Errors
    ///
    /// Returns `Handshake` if the server rejects the request or answers with
    /// a malformed result, `Timeout` if it does not answer in time, or a
    /// transport error.
    pub async fn initialize(&self) -> SessionResult<&InitializeResult> {
        match self.state() {
            SessionState::Uninitialized => {}
            SessionState::Ready => {
                if let Some(result) = self.server.get() {
                    return Ok(result);
                }
            }
            SessionState::Closing | SessionState::Closed => {
                return Err(SessionError::SessionClosed);
            }
            SessionState::Initializing => {
                return Err(SessionError::Handshake {
                    message: "handshake already in progress".to_string(),
                });
            }
        }

        let params = serde_json::to_value(InitializeParams::default()).map_err(DecodeError::Encode)?;
        let value = self
            .send_request("initialize", Some(params), false, self.settings.init_timeout)
            .await
            .map_err(|e| match e {
                SessionError::Rpc { code, message } => SessionError::Handshake {
                    message: format!("[{code}] {message}"),
                },
                other => other,
            })?;

        let result: InitializeResult =
            serde_json::from_value(value).map_err(|e| SessionError::Handshake {
                message: format!("malformed initialize result: {e}"),
            })?;

        if result.protocol_version != MCP_PROTOCOL_VERSION {
            warn!(
                requested = MCP_PROTOCOL_VERSION,
                negotiated = %result.protocol_version,
                "Server negotiated a different protocol version"
            );
        }

        self.transition(SessionState::Uninitialized, SessionState::Initializing)?;
        self.notify("notifications/initialized", None).await?;
        self.transition(SessionState::Initializing, SessionState::Ready)?;

        info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            protocol_version = %result.protocol_version,
            "MCP session ready"
        );

        Ok(self.server.get_or_init(|| result))
    }

    /// Lists every tool the server declares, in server order.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` before the handshake, or any transport/RPC error.
    pub async fn list_tools(&self) -> SessionResult<Vec<Tool>> {
        self.paginate("tools/list", |page: ListToolsResult| {
            (page.tools, page.next_cursor)
        })
        .await
    }

    /// Lists every prompt the server declares, in server order.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` before the handshake, or any transport/RPC error.
    pub async fn list_prompts(&self) -> SessionResult<Vec<Prompt>> {
        self.paginate("prompts/list", |page: ListPromptsResult| {
            (page.prompts, page.next_cursor)
        })
        .await
    }

    /// Lists every resource the server declares, in server order.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` before the handshake, or any transport/RPC error.
    pub async fn list_resources(&self) -> SessionResult<Vec<Resource>> {
        self.paginate("resources/list", |page: ListResourcesResult| {
            (page.resources, page.next_cursor)
        })
        .await
    }

    /// Calls a tool. Arguments are forwarded untouched.
    ///
    /// # Errors
    ///
    /// Returns `Tool` if the server reports a failure (either as a JSON-RPC
    /// error or as a result with `isError` set).
    pub async fn call_tool(&self, name: &str, arguments: Value) -> SessionResult<CallToolResult> {
        let params = json!({ "name": name, "arguments": arguments });

        match self.call::<CallToolResult>("tools/call", Some(params)).await {
            Ok(result) if result.is_error => Err(SessionError::Tool {
                name: name.to_string(),
                message: result.text(),
            }),
            Ok(result) => Ok(result),
            Err(SessionError::Rpc { message, .. }) => Err(SessionError::Tool {
                name: name.to_string(),
                message,
            }),
            Err(e) => Err(e),
        }
    }

    /// Renders a prompt template.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the server rejects the lookup.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: &BTreeMap<String, String>,
    ) -> SessionResult<GetPromptResult> {
        let params = json!({ "name": name, "arguments": arguments });

        self.call("prompts/get", Some(params))
            .await
            .map_err(|e| match e {
                SessionError::Rpc { message, .. } => SessionError::NotFound {
                    kind: "prompt",
                    name: name.to_string(),
                    message,
                },
                other => other,
            })
    }

    /// Reads a resource.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the server rejects the lookup.
    pub async fn read_resource(&self, uri: &str) -> SessionResult<ReadResourceResult> {
        let params = json!({ "uri": uri });

        self.call("resources/read", Some(params))
            .await
            .map_err(|e| match e {
                SessionError::Rpc { message, .. } => SessionError::NotFound {
                    kind: "resource",
                    name: uri.to_string(),
                    message,
                },
                other => other,
            })
    }

    /// Checks that the server is responsive.
    ///
    /// # Errors
    ///
    /// Returns any transport or RPC error.
    pub async fn ping(&self) -> SessionResult<()> {
        self.send_request("ping", None, true, self.settings.request_timeout)
            .await
            .map(|_| ())
    }

    /// Tears the session down.
    ///
    /// Closes the outbound stream, waits for the server to exit (killing it
    /// after the shutdown timeout), stops the dispatch task and fails every
    /// request still pending with `SessionClosed`. Safe to call repeatedly.
    pub async fn close(&self) {
        {
            let mut shared = lock(&self.shared);
            if shared.state != SessionState::Closed {
                shared.state = SessionState::Closing;
            }
        }

        match tokio::time::timeout(self.settings.shutdown_timeout, self.writer.lock()).await {
            Ok(mut writer) => writer.close().await,
            Err(_) => warn!("Outbound stream busy during shutdown, skipping graceful close"),
        }

        if let Some(process) = self.process.lock().await.take() {
            debug!(command = process.command(), pid = ?process.id(), "Stopping server process");
            process.shutdown(self.settings.shutdown_timeout).await;
        }

        self.cancel.cancel();
        if let Some(dispatcher) = self.dispatcher.lock().await.take() {
            if let Err(e) = dispatcher.await {
                warn!(error = %e, "Dispatch task ended abnormally");
            }
        }

        close_pending(&self.shared, "closed by client");
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> SessionResult<T> {
        let value = self
            .send_request(method, params, true, self.settings.request_timeout)
            .await?;

        serde_json::from_value(value)
            .map_err(|e| SessionError::protocol(format!("malformed {method} result: {e}")))
    }

    async fn paginate<P, T>(
        &self,
        method: &str,
        split: impl Fn(P) -> (Vec<T>, Option<String>),
    ) -> SessionResult<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let (page, next) = split(self.call::<P>(method, params).await?);
            items.extend(page);

            match next {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(items),
            }
        }

        warn!(method, pages = MAX_LIST_PAGES, "Stopped following list pagination");
        Ok(items)
    }

    fn register(&self, require_ready: bool) -> SessionResult<(RequestId, oneshot::Receiver<Reply>)> {
        let mut shared = lock(&self.shared);

        match shared.state {
            SessionState::Closing | SessionState::Closed => {
                return Err(SessionError::SessionClosed);
            }
            state if require_ready && state != SessionState::Ready => {
                return Err(SessionError::NotReady { state });
            }
            _ => {}
        }

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        shared.pending.insert(id.clone(), tx);

        Ok((id, rx))
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        require_ready: bool,
        timeout: Duration,
    ) -> Reply {
        let (id, rx) = self.register(require_ready)?;
        let _guard = PendingGuard {
            shared: &self.shared,
            id: id.clone(),
        };

        let frame = encode(&Message::Request(JsonRpcRequest::new(id.clone(), method, params)))?;
        debug!(method, id = %id, "Sending request");
        self.send_frame(&frame).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(SessionError::SessionClosed),
            Err(_) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(method, id = %id, timeout_ms, "Request timed out");
                Err(SessionError::Timeout {
                    method: method.to_string(),
                    timeout_ms,
                })
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> SessionResult<()> {
        let frame = encode(&Message::Notification(JsonRpcNotification::new(method, params)))?;
        debug!(method, "Sending notification");
        self.send_frame(&frame).await
    }

    async fn send_frame(&self, frame: &str) -> SessionResult<()> {
        let result = self.writer.lock().await.send(frame).await;
        if let Err(ref e) = result {
            warn!(error = %e, "Write to server failed, closing session");
            self.cancel.cancel();
        }
        result
    }

    fn transition(&self, from: SessionState, to: SessionState) -> SessionResult<()> {
        let mut shared = lock(&self.shared);
        if shared.state != from {
            return Err(SessionError::SessionClosed);
        }
        debug!(?from, ?to, "Session state transition");
        shared.state = to;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Marks the session closed and fails every pending slot.
fn close_pending(shared: &Mutex<Shared>, reason: &str) {
    let (pending, was_closed) = {
        let mut shared = lock(shared);
        let was_closed = shared.state == SessionState::Closed;
        shared.state = SessionState::Closed;
        (std::mem::take(&mut shared.pending), was_closed)
    };

    if !was_closed {
        info!(reason, pending = pending.len(), "MCP session closed");
    }

    for (id, slot) in pending {
        debug!(id = %id, "Failing pending request");
        let _ = slot.send(Err(SessionError::SessionClosed));
    }
}

/// Reads frames until the transport closes, routing each to its destination.
///
/// When the stream ends or turns unreadable on its own, the session is closed
/// and the server process reaped. Cancellation leaves both to
/// [`Session::close`].
async fn dispatch_loop(
    mut reader: FrameReader,
    shared: SharedState,
    writer: Arc<AsyncMutex<FrameWriter>>,
    process: Arc<AsyncMutex<Option<ProcessHandle>>>,
    handler: Arc<dyn NotificationHandler>,
    cancel: CancellationToken,
    shutdown_timeout: Duration,
) {
    let mut decode_failures = 0u32;

    let reason = loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break None,
            frame = reader.receive() => frame,
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => break Some("server closed its output".to_string()),
            Err(e) => break Some(format!("read failed: {e}")),
        };

        trace!(frame = %frame, "Received frame");

        match decode(&frame) {
            Ok(message) => {
                decode_failures = 0;
                route(message, &shared, &writer, handler.as_ref());
            }
            Err(e) if !e.is_corrupt() => {
                warn!(error = %e, "Dropping response that matches no request");
            }
            Err(e) => {
                decode_failures += 1;
                warn!(
                    error = %e,
                    consecutive = decode_failures,
                    "Dropping malformed frame"
                );
                if decode_failures >= MAX_CONSECUTIVE_DECODE_FAILURES {
                    break Some(format!("{decode_failures} consecutive malformed frames"));
                }
            }
        }
    };

    cancel.cancel();

    let Some(reason) = reason else {
        close_pending(&shared, "dispatch cancelled");
        return;
    };

    close_pending(&shared, &reason);

    match tokio::time::timeout(shutdown_timeout, writer.lock()).await {
        Ok(mut writer) => writer.close().await,
        Err(_) => debug!("Outbound stream busy, leaving it to the process shutdown"),
    }
    if let Some(process) = process.lock().await.take() {
        info!(
            command = process.command(),
            pid = ?process.id(),
            reason = %reason,
            "Reaping server process"
        );
        process.shutdown(shutdown_timeout).await;
    }
}

fn route(
    message: Message,
    shared: &Mutex<Shared>,
    writer: &Arc<AsyncMutex<FrameWriter>>,
    handler: &dyn NotificationHandler,
) {
    match message {
        Message::Response(response) => {
            let slot = lock(shared).pending.remove(&response.id);
            let Some(slot) = slot else {
                warn!(id = %response.id, "Dropping response with unknown id");
                return;
            };

            let id = response.id.clone();
            let reply = response
                .into_result()
                .map_err(|e| SessionError::Rpc {
                    code: e.code,
                    message: e.message,
                });
            if slot.send(reply).is_err() {
                debug!(id = %id, "Caller stopped waiting before the response arrived");
            }
        }
        Message::Notification(notification) => handler.on_notification(notification),
        Message::Request(request) => answer_server_request(request, Arc::clone(writer)),
    }
}

/// Replies to a server-initiated request without blocking the dispatch loop.
fn answer_server_request(request: JsonRpcRequest, writer: Arc<AsyncMutex<FrameWriter>>) {
    let response = if request.method == "ping" {
        JsonRpcResponse::success(request.id, json!({}))
    } else {
        debug!(method = %request.method, "Rejecting unsupported server request");
        JsonRpcResponse::failure(request.id, ErrorObject::method_not_found(&request.method))
    };

    tokio::spawn(async move {
        match encode(&Message::Response(response)) {
            Ok(frame) => {
                if let Err(e) = writer.lock().await.send(&frame).await {
                    debug!(error = %e, "Could not answer server request");
                }
            }
            Err(e) => warn!(error = %e, "Could not encode reply to server request"),
        }
    });
}
