//! Transport session: one live connection to the analyzer process.
//!
//! Requests are correlated by id through a pending map of oneshot senders,
//! so any number of them may be in flight at once. The map becomes `None`
//! when the connection goes away; every waiting caller then sees
//! [`SessionError::ConnectionLost`] instead of hanging.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use ttx_highlight::TokenBatch;

use crate::codec::{FrameReader, FrameWriter};
use crate::error::SessionError;
use crate::protocol::{
    self, FormatParams, FormatResult, IncomingFrame, LogMessageParams, Notification,
    PublishDiagnosticsParams, Request, RpcError, TokenizeParams,
};
use crate::types::{AnalyzerConfig, LspEvent, SessionState, TransportKind};

const WRITER_CHANNEL_CAPACITY: usize = 64;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type Reply = Result<serde_json::Value, RpcError>;
type PendingMap = Arc<Mutex<Option<HashMap<u64, oneshot::Sender<Reply>>>>>;

enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

/// Owns the state machine and reports every transition in order.
struct Lifecycle {
    state: Mutex<SessionState>,
    events: mpsc::UnboundedSender<LspEvent>,
}

impl Lifecycle {
    /// The event is emitted while the state lock is held, so observers see
    /// transitions in the order they happened.
    async fn transition(&self, new: SessionState) {
        let mut state = self.state.lock().await;
        if *state == new {
            return;
        }
        let old = std::mem::replace(&mut *state, new);
        let _ = self.events.send(LspEvent::StateChanged { old, new });
    }

    async fn transition_from(&self, expected: SessionState, new: SessionState) -> bool {
        let mut state = self.state.lock().await;
        if *state != expected {
            return false;
        }
        *state = new;
        let _ = self.events.send(LspEvent::StateChanged { old: expected, new });
        true
    }

    async fn current(&self) -> SessionState {
        *self.state.lock().await
    }
}

/// Request/notification half of a live connection.
struct Channel {
    writer_tx: mpsc::Sender<WriterCommand>,
    pending: PendingMap,
    next_id: AtomicU64,
    timeout: Duration,
}

impl Channel {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        match self.pending.lock().await.as_mut() {
            Some(pending) => pending.insert(id, tx),
            None => return Err(SessionError::ConnectionLost),
        };

        let frame = serde_json::to_value(Request::new(id, method, params)).map_err(|source| {
            SessionError::Encode {
                method: method.to_string(),
                source,
            }
        });
        let sent = match frame {
            Ok(frame) => self.writer_tx.send(WriterCommand::Send(frame)).await.is_ok(),
            Err(err) => {
                self.forget(id).await;
                return Err(err);
            }
        };
        if !sent {
            self.forget(id).await;
            return Err(SessionError::ConnectionLost);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(error))) => Err(SessionError::Rpc {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            }),
            // Sender dropped: the pending map was closed.
            Ok(Err(_)) => Err(SessionError::ConnectionLost),
            Err(_) => {
                self.forget(id).await;
                Err(SessionError::Timeout {
                    method: method.to_string(),
                    after: timeout,
                })
            }
        }
    }

    async fn forget(&self, id: u64) {
        if let Some(pending) = self.pending.lock().await.as_mut() {
            pending.remove(&id);
        }
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), SessionError> {
        let frame = serde_json::to_value(Notification::new(method, params)).map_err(|source| {
            SessionError::Encode {
                method: method.to_string(),
                source,
            }
        })?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| SessionError::ConnectionLost)
    }

    /// Fail every waiting request with `ConnectionLost` and refuse new ones.
    async fn close(&self) {
        close_pending(&self.pending).await;
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;
    }
}

async fn close_pending(pending: &PendingMap) {
    // Dropping the senders wakes every receiver.
    pending.lock().await.take();
}

/// Process-side resources of a live connection.
struct Connection {
    child: Option<Child>,
    socket_path: Option<PathBuf>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    async fn teardown(mut self, grace: Duration) {
        if let Some(child) = self.child.as_mut()
            && tokio::time::timeout(grace, child.wait()).await.is_err()
        {
            tracing::debug!("analyzer didn't exit in time, killing");
            let _ = child.kill().await;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(path) = self.socket_path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Streams and process obtained by launching or attaching.
struct Transport {
    reader: BoxedReader,
    writer: BoxedWriter,
    connection: Connection,
}

/// A session with one analyzer process.
///
/// All operations take `&self`; share the session (e.g. in an `Arc`) to issue
/// requests concurrently with `stop()`.
pub struct Session {
    config: AnalyzerConfig,
    workspace_root: PathBuf,
    base_dir: PathBuf,
    lifecycle: Arc<Lifecycle>,
    channel: RwLock<Option<Arc<Channel>>>,
    /// Also serializes start/stop.
    connection: Mutex<Option<Connection>>,
}

impl Session {
    /// Create a stopped session. Lifecycle and diagnostics events are sent to
    /// `events`.
    pub fn new(
        config: AnalyzerConfig,
        workspace_root: impl Into<PathBuf>,
        events: mpsc::UnboundedSender<LspEvent>,
    ) -> Self {
        let workspace_root = workspace_root.into();
        Self {
            config,
            base_dir: workspace_root.clone(),
            workspace_root,
            lifecycle: Arc::new(Lifecycle {
                state: Mutex::new(SessionState::Stopped),
                events,
            }),
            channel: RwLock::new(None),
            connection: Mutex::new(None),
        }
    }

    /// Directory a relative analyzer command is resolved against.
    /// Defaults to the workspace root.
    #[must_use]
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    #[must_use]
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub async fn state(&self) -> SessionState {
        self.lifecycle.current().await
    }

    /// Launch the configured analyzer and initialize it.
    ///
    /// A no-op when already running. On failure the session is back in
    /// `Stopped` and may be started again.
    pub async fn start(&self) -> Result<(), SessionError> {
        let mut slot = self.connection.lock().await;
        if self.reuse_running(&mut slot).await {
            return Ok(());
        }

        self.lifecycle.transition(SessionState::Starting).await;
        let transport = match self.launch().await {
            Ok(transport) => transport,
            Err(err) => {
                tracing::warn!("Failed to launch analyzer: {err}");
                self.lifecycle.transition(SessionState::Stopped).await;
                return Err(err);
            }
        };
        self.bring_up(&mut slot, transport).await
    }

    /// Start over an already-connected byte stream instead of launching a
    /// process.
    pub async fn attach<R, W>(&self, reader: R, writer: W) -> Result<(), SessionError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut slot = self.connection.lock().await;
        if self.reuse_running(&mut slot).await {
            return Ok(());
        }

        self.lifecycle.transition(SessionState::Starting).await;
        let transport = Transport {
            reader: Box::new(reader),
            writer: Box::new(writer),
            connection: Connection {
                child: None,
                socket_path: None,
                tasks: Vec::new(),
            },
        };
        self.bring_up(&mut slot, transport).await
    }

    /// Gracefully shut the analyzer down. Idempotent.
    ///
    /// Requests still in flight when the connection closes fail with
    /// `ConnectionLost`.
    pub async fn stop(&self) {
        let mut slot = self.connection.lock().await;
        let Some(connection) = slot.take() else {
            return;
        };
        let channel = self.take_channel();

        // The analyzer may already have dropped the connection.
        let live = self
            .lifecycle
            .transition_from(SessionState::Running, SessionState::Stopping)
            .await;

        if let Some(channel) = channel {
            if live {
                let grace = self.config.shutdown_timeout();
                match channel.request("shutdown", None, grace).await {
                    Ok(_) => {
                        let _ = channel.notify("exit", None).await;
                    }
                    Err(err) => tracing::debug!("analyzer shutdown request failed: {err}"),
                }
            }
            channel.close().await;
        }

        connection.teardown(self.config.shutdown_timeout()).await;
        if live {
            self.lifecycle.transition(SessionState::Stopped).await;
            tracing::info!("Lsp client stopped.");
        }
    }

    pub async fn restart(&self) -> Result<(), SessionError> {
        self.stop().await;
        self.start().await
    }

    /// Send a request and wait for its correlated reply.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, SessionError> {
        let channel = self.live_channel()?;
        channel.request(method, params, channel.timeout).await
    }

    /// Typed wrapper around [`request`](Self::request).
    pub async fn request_typed<P, T>(&self, method: &str, params: &P) -> Result<T, SessionError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(|source| SessionError::Encode {
            method: method.to_string(),
            source,
        })?;
        let result = self.request(method, Some(params)).await?;
        serde_json::from_value(result).map_err(|source| SessionError::InvalidResponse {
            method: method.to_string(),
            source,
        })
    }

    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), SessionError> {
        self.live_channel()?.notify(method, params).await
    }

    /// Ask the analyzer for the token batch of `source`.
    pub async fn tokenize(&self, source: &str) -> Result<TokenBatch, SessionError> {
        self.request_typed("tokenize", &TokenizeParams { source })
            .await
    }

    /// Ask the analyzer for the formatted text of `source`.
    pub async fn format(&self, source: &str, name: &str) -> Result<String, SessionError> {
        let result: FormatResult = self
            .request_typed("format", &FormatParams { source, name })
            .await?;
        Ok(result.document)
    }

    fn live_channel(&self) -> Result<Arc<Channel>, SessionError> {
        self.channel
            .read()
            .map_err(|_| SessionError::NotRunning)?
            .clone()
            .ok_or(SessionError::NotRunning)
    }

    fn take_channel(&self) -> Option<Arc<Channel>> {
        match self.channel.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn install_channel(&self, channel: Arc<Channel>) {
        match self.channel.write() {
            Ok(mut guard) => *guard = Some(channel),
            Err(poisoned) => *poisoned.into_inner() = Some(channel),
        }
    }

    /// True if a healthy connection exists. A connection the analyzer dropped
    /// is torn down so a new one can be made.
    async fn reuse_running(&self, slot: &mut Option<Connection>) -> bool {
        if slot.is_none() {
            return false;
        }
        if self.lifecycle.current().await == SessionState::Running {
            return true;
        }
        self.take_channel();
        if let Some(stale) = slot.take() {
            stale.teardown(self.config.shutdown_timeout()).await;
        }
        false
    }

    async fn launch(&self) -> Result<Transport, SessionError> {
        let command = resolve_command(&self.config.command, &self.base_dir)?;
        tracing::info!("Launching analyzer using path: {}", command.display());

        let mut cmd = Command::new(&command);
        cmd.args(&self.config.args).kill_on_drop(true);

        match self.config.transport {
            TransportKind::Stdio => launch_stdio(cmd, &command),
            TransportKind::Pipe => launch_pipe(cmd, &command, self.config.request_timeout()).await,
        }
    }

    /// Spawn the reader and writer tasks, then run the initialize handshake.
    async fn bring_up(
        &self,
        slot: &mut Option<Connection>,
        transport: Transport,
    ) -> Result<(), SessionError> {
        let Transport {
            reader,
            writer,
            mut connection,
        } = transport;

        let pending: PendingMap = Arc::new(Mutex::new(Some(HashMap::new())));
        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);

        connection.tasks.push(tokio::spawn(async move {
            let mut writer = FrameWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("analyzer write error: {e}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => {
                        let _ = writer.close().await;
                        break;
                    }
                }
            }
        }));

        let reader_ctx = ReaderContext {
            pending: pending.clone(),
            events: self.lifecycle.events.clone(),
            writer_tx: writer_tx.clone(),
        };
        let lifecycle = self.lifecycle.clone();
        connection.tasks.push(tokio::spawn(async move {
            let mut reader = FrameReader::new(reader);
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => reader_ctx.dispatch(&frame).await,
                    Ok(None) => {
                        tracing::info!("analyzer closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("analyzer read error: {e}");
                        break;
                    }
                }
            }
            close_pending(&reader_ctx.pending).await;
            lifecycle
                .transition_from(SessionState::Running, SessionState::Stopped)
                .await;
        }));

        let channel = Arc::new(Channel {
            writer_tx,
            pending,
            next_id: AtomicU64::new(1),
            timeout: self.config.request_timeout(),
        });
        self.install_channel(channel.clone());

        if let Err(err) = self.initialize(&channel).await {
            tracing::warn!("analyzer initialization failed: {err}");
            self.take_channel();
            channel.close().await;
            connection.teardown(Duration::ZERO).await;
            self.lifecycle.transition(SessionState::Stopped).await;
            return Err(err);
        }

        *slot = Some(connection);
        self.lifecycle.transition(SessionState::Running).await;
        Ok(())
    }

    async fn initialize(&self, channel: &Channel) -> Result<(), SessionError> {
        let root_uri = protocol::path_to_file_uri(&self.workspace_root)
            .map_err(|e| SessionError::Connection(e.to_string()))?;
        let params = protocol::initialize_params(root_uri.as_str());

        match channel
            .request("initialize", Some(params), channel.timeout)
            .await
        {
            Ok(_) => {}
            Err(SessionError::Rpc { message, .. }) => {
                return Err(SessionError::Connection(format!(
                    "initialize rejected: {message}"
                )));
            }
            Err(err) => return Err(err),
        }

        channel
            .notify("initialized", Some(serde_json::json!({})))
            .await
    }
}

/// Everything the reader task needs to route incoming frames.
struct ReaderContext {
    pending: PendingMap,
    events: mpsc::UnboundedSender<LspEvent>,
    writer_tx: mpsc::Sender<WriterCommand>,
}

impl ReaderContext {
    async fn dispatch(&self, frame: &serde_json::Value) {
        let Some(incoming) = protocol::parse_incoming(frame) else {
            tracing::trace!("Ignoring malformed JSON-RPC frame from analyzer");
            return;
        };

        match incoming {
            IncomingFrame::Response { id, reply } => {
                let sender = self
                    .pending
                    .lock()
                    .await
                    .as_mut()
                    .and_then(|pending| pending.remove(&id));
                match sender {
                    Some(tx) => {
                        let _ = tx.send(reply);
                    }
                    None => tracing::trace!(id, "reply for unknown or abandoned request"),
                }
            }
            IncomingFrame::ServerRequest { id, method } => {
                // The analyzer blocks until it gets an answer.
                let response = match method.as_str() {
                    "client/registerCapability"
                    | "client/unregisterCapability"
                    | "window/workDoneProgress/create" => {
                        protocol::response(id, serde_json::Value::Null)
                    }
                    _ => {
                        tracing::debug!("analyzer sent request {method}, replying method not found");
                        protocol::error_response(
                            id,
                            protocol::METHOD_NOT_FOUND,
                            &format!("Method not found: {method}"),
                        )
                    }
                };
                let _ = self.writer_tx.send(WriterCommand::Send(response)).await;
            }
            IncomingFrame::Notification { method, params } => {
                self.handle_notification(&method, params);
            }
        }
    }

    fn handle_notification(&self, method: &str, params: Option<serde_json::Value>) {
        let Some(params) = params else { return };
        match method {
            "textDocument/publishDiagnostics" => {
                match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                    Ok(params) => {
                        let _ = self.events.send(LspEvent::Diagnostics {
                            uri: params.uri,
                            diagnostics: params.diagnostics,
                        });
                    }
                    Err(e) => tracing::debug!("Failed to parse publishDiagnostics: {e}"),
                }
            }
            "window/logMessage" | "window/showMessage" => {
                match serde_json::from_value::<LogMessageParams>(params) {
                    Ok(params) => {
                        let _ = self.events.send(LspEvent::Message {
                            level: params.level(),
                            message: params.message,
                        });
                    }
                    Err(e) => tracing::debug!("Failed to parse {method}: {e}"),
                }
            }
            _ => tracing::trace!("Ignoring notification from analyzer: {method}"),
        }
    }
}

/// Resolve the analyzer executable once per start.
fn resolve_command(command: &Path, base_dir: &Path) -> Result<PathBuf, SessionError> {
    if command.is_absolute() {
        return Ok(command.to_path_buf());
    }
    let candidate = base_dir.join(command);
    if command.components().count() > 1 || candidate.is_file() {
        return Ok(candidate);
    }
    which::which(command).map_err(|e| {
        SessionError::Connection(format!("{} not found in PATH: {e}", command.display()))
    })
}

fn launch_stdio(mut cmd: Command, command: &Path) -> Result<Transport, SessionError> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| {
        SessionError::Connection(format!("spawning {}: {e}", command.display()))
    })?;

    let (Some(stdout), Some(stdin)) = (child.stdout.take(), child.stdin.take()) else {
        return Err(SessionError::Connection("analyzer stdio unavailable".into()));
    };
    let mut tasks = Vec::new();
    if let Some(stderr) = child.stderr.take() {
        tasks.push(forward_output(stderr, "stderr"));
    }

    Ok(Transport {
        reader: Box::new(stdout),
        writer: Box::new(stdin),
        connection: Connection {
            child: Some(child),
            socket_path: None,
            tasks,
        },
    })
}

#[cfg(unix)]
async fn launch_pipe(
    mut cmd: Command,
    command: &Path,
    accept_timeout: Duration,
) -> Result<Transport, SessionError> {
    use tokio::net::UnixListener;

    let socket_path =
        std::env::temp_dir().join(format!("ttx-lsp-{}.sock", uuid::Uuid::new_v4().simple()));
    let listener = UnixListener::bind(&socket_path).map_err(|e| {
        SessionError::Connection(format!("binding {}: {e}", socket_path.display()))
    })?;

    cmd.arg(format!("--pipe={}", socket_path.display()))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let _ = std::fs::remove_file(&socket_path);
            return Err(SessionError::Connection(format!(
                "spawning {}: {e}",
                command.display()
            )));
        }
    };

    let mut tasks = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        tasks.push(forward_output(stdout, "stdout"));
    }
    if let Some(stderr) = child.stderr.take() {
        tasks.push(forward_output(stderr, "stderr"));
    }
    let mut connection = Connection {
        child: Some(child),
        socket_path: Some(socket_path),
        tasks,
    };

    match tokio::time::timeout(accept_timeout, listener.accept()).await {
        Ok(Ok((stream, _))) => {
            let (reader, writer) = stream.into_split();
            Ok(Transport {
                reader: Box::new(reader),
                writer: Box::new(writer),
                connection,
            })
        }
        Ok(Err(e)) => {
            if let Some(child) = connection.child.as_mut() {
                let _ = child.kill().await;
            }
            connection.teardown(Duration::ZERO).await;
            Err(SessionError::Connection(format!("accepting analyzer connection: {e}")))
        }
        Err(_) => {
            if let Some(child) = connection.child.as_mut() {
                let _ = child.kill().await;
            }
            connection.teardown(Duration::ZERO).await;
            Err(SessionError::Connection(format!(
                "analyzer did not connect within {accept_timeout:?}"
            )))
        }
    }
}

#[cfg(not(unix))]
async fn launch_pipe(
    _cmd: Command,
    _command: &Path,
    _accept_timeout: Duration,
) -> Result<Transport, SessionError> {
    Err(SessionError::Connection(
        "pipe transport requires a unix platform; use transport = \"stdio\"".into(),
    ))
}

/// Copy analyzer output lines into the log.
fn forward_output<R>(stream: R, name: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(target: "analyzer", stream = name, "{line}");
        }
    })
}
