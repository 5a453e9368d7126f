//! Fake analyzer speaking framed JSON-RPC over an in-memory duplex stream.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use ttx_lsp::codec::{FrameReader, FrameWriter};

/// How the fake answers one request.
pub enum Reply {
    Result(Value),
    Error { code: i64, message: String },
    After(Duration, Box<Reply>),
    /// Never answer.
    Silent,
}

impl Reply {
    pub fn after_ms(ms: u64, reply: Reply) -> Self {
        Self::After(Duration::from_millis(ms), Box::new(reply))
    }
}

pub type Handler = Arc<dyn Fn(&str, &Value) -> Reply + Send + Sync>;

type SharedWriter = Arc<Mutex<FrameWriter<WriteHalf<DuplexStream>>>>;

/// Answers the lifecycle requests; everything else falls through to `other`.
pub fn handler(other: impl Fn(&str, &Value) -> Reply + Send + Sync + 'static) -> Handler {
    Arc::new(move |method, params| match method {
        "initialize" => Reply::Result(json!({
            "capabilities": { "documentFormattingProvider": true }
        })),
        "shutdown" => Reply::Result(Value::Null),
        _ => other(method, params),
    })
}

/// Lifecycle only; any other request gets method not found.
pub fn lifecycle_only() -> Handler {
    handler(|method, _| Reply::Error {
        code: -32601,
        message: format!("Method not found: {method}"),
    })
}

pub struct FakeAnalyzer {
    received: mpsc::UnboundedReceiver<Value>,
    writer: SharedWriter,
    task: JoinHandle<()>,
}

pub type ClientSide = (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>);

impl FakeAnalyzer {
    /// Start the fake; the returned halves are what the client attaches to.
    pub fn spawn(handler: Handler) -> (Self, ClientSide) {
        let (client_io, server_io) = tokio::io::duplex(1 << 16);
        let (server_read, server_write) = tokio::io::split(server_io);
        let writer: SharedWriter = Arc::new(Mutex::new(FrameWriter::new(server_write)));
        let (received_tx, received) = mpsc::unbounded_channel();

        let task_writer = writer.clone();
        let task = tokio::spawn(async move {
            let mut reader = FrameReader::new(server_read);
            while let Ok(Some(frame)) = reader.read_frame().await {
                let _ = received_tx.send(frame.clone());
                let method = frame["method"].as_str().unwrap_or_default().to_string();
                if method == "exit" {
                    let _ = task_writer.lock().await.close().await;
                    break;
                }
                let Some(id) = frame.get("id").cloned() else {
                    continue;
                };
                if method.is_empty() {
                    // A reply to one of our requests.
                    continue;
                }
                let reply = handler(&method, &frame["params"]);
                tokio::spawn(respond(task_writer.clone(), id, reply));
            }
        });

        (
            Self {
                received,
                writer,
                task,
            },
            tokio::io::split(client_io),
        )
    }

    /// Next frame sent by the client whose method (or, for responses, id)
    /// matches. Earlier frames are discarded.
    pub async fn expect(&mut self, method: &str) -> Value {
        let wait = async {
            loop {
                let frame = self
                    .received
                    .recv()
                    .await
                    .expect("client connection closed");
                if frame["method"] == method {
                    return frame;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {method}"))
    }

    /// Next response the client sent for a server request with `id`.
    pub async fn expect_response(&mut self, id: &Value) -> Value {
        let wait = async {
            loop {
                let frame = self.received.recv().await.expect("connection closed");
                if frame.get("method").is_none() && frame.get("id") == Some(id) {
                    return frame;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("timed out waiting for response")
    }

    /// All frames received so far, without waiting.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.received.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Send an unsolicited frame (notification or server request).
    pub async fn push(&self, frame: Value) {
        self.writer
            .lock()
            .await
            .write_frame(&frame)
            .await
            .expect("push to client");
    }

    pub async fn publish_diagnostics(&self, uri: &str, diagnostics: Value) {
        self.push(json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": { "uri": uri, "diagnostics": diagnostics }
        }))
        .await;
    }

    /// Drop the connection as a crashing analyzer would.
    pub async fn disconnect(self) {
        self.task.abort();
        let _ = self.writer.lock().await.close().await;
    }
}

async fn respond(writer: SharedWriter, id: Value, reply: Reply) {
    let mut reply = reply;
    loop {
        match reply {
            Reply::After(delay, inner) => {
                tokio::time::sleep(delay).await;
                reply = *inner;
            }
            Reply::Result(result) => {
                let frame = json!({ "jsonrpc": "2.0", "id": id, "result": result });
                let _ = writer.lock().await.write_frame(&frame).await;
                return;
            }
            Reply::Error { code, message } => {
                let frame = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": code, "message": message }
                });
                let _ = writer.lock().await.write_frame(&frame).await;
                return;
            }
            Reply::Silent => return,
        }
    }
}

/// Workspace root used by every test; it only has to be absolute.
pub fn workspace_root() -> std::path::PathBuf {
    std::env::temp_dir()
}

/// Poll `check` every 10ms for up to 5s.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}
