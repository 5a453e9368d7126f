//! Internal JSON-RPC message types and request parameter builders.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{Diagnostic, FileChangeType, MessageLevel};

pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// JSON-RPC error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct RpcError {
    pub code: i64,
    pub message: String,
}

pub(crate) enum IncomingFrame {
    Response {
        id: u64,
        reply: Result<serde_json::Value, RpcError>,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

pub(crate) fn parse_incoming(frame: &serde_json::Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(serde_json::Value::as_str)
        .map(String::from);

    match (id, method) {
        (Some(id), None) => {
            let reply = match frame.get("error") {
                Some(error) => Err(serde_json::from_value(error.clone()).unwrap_or_else(|_| {
                    RpcError {
                        code: 0,
                        message: error.to_string(),
                    }
                })),
                None => Ok(frame.get("result")?.clone()),
            };
            Some(IncomingFrame::Response {
                id: id.as_u64()?,
                reply,
            })
        }
        (Some(id), Some(method)) => Some(IncomingFrame::ServerRequest {
            id: id.clone(),
            method,
        }),
        (None, Some(method)) => Some(IncomingFrame::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        (None, None) => None,
    }
}

pub(crate) fn response(id: serde_json::Value, result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

pub(crate) fn error_response(id: serde_json::Value, code: i64, message: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

pub(crate) fn initialize_params(root_uri: &str) -> serde_json::Value {
    serde_json::json!({
        "processId": std::process::id(),
        "clientInfo": { "name": "ttx-lsp", "version": env!("CARGO_PKG_VERSION") },
        "rootUri": root_uri,
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": false,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": false
                },
                "publishDiagnostics": {
                    "relatedInformation": false
                },
                "formatting": {
                    "dynamicRegistration": false
                },
                "semanticTokens": {
                    "dynamicRegistration": false,
                    "requests": { "full": true },
                    "tokenTypes": ttx_highlight::Legend::standard().token_types(),
                    "tokenModifiers": ttx_highlight::legend::TOKEN_MODIFIERS,
                    "formats": ["relative"]
                }
            },
            "workspace": {
                "didChangeWatchedFiles": { "dynamicRegistration": false }
            }
        },
        "workspaceFolders": [{
            "uri": root_uri,
            "name": "workspace"
        }]
    })
}

pub(crate) fn did_open_params(
    uri: &str,
    language_id: &str,
    version: i32,
    text: &str,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(uri: &str, version: i32, text: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "text": text
        }]
    })
}

pub(crate) fn did_close_params(uri: &str) -> serde_json::Value {
    serde_json::json!({ "textDocument": { "uri": uri } })
}

pub(crate) fn did_change_watched_files_params(changes: &[(String, FileChangeType)]) -> serde_json::Value {
    let changes: Vec<_> = changes
        .iter()
        .map(|(uri, kind)| serde_json::json!({ "uri": uri, "type": kind.to_lsp() }))
        .collect();
    serde_json::json!({ "changes": changes })
}

/// Parameters of the analyzer's `tokenize` request.
#[derive(Debug, Serialize)]
pub(crate) struct TokenizeParams<'a> {
    pub source: &'a str,
}

/// Parameters of the analyzer's `format` request.
#[derive(Debug, Serialize)]
pub(crate) struct FormatParams<'a> {
    pub source: &'a str,
    pub name: &'a str,
}

/// Reply body of the analyzer's `format` request.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FormatResult {
    pub document: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LogMessageParams {
    #[serde(rename = "type")]
    pub kind: u8,
    pub message: String,
}

impl LogMessageParams {
    pub fn level(&self) -> MessageLevel {
        MessageLevel::from_lsp(self.kind)
    }
}

pub fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}
