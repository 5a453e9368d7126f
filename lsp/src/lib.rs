//! Async client for the Tetrodotoxin analyzer.
//!
//! A [`Session`] owns one connection to the analyzer and correlates requests
//! by id. [`TtxClient`] layers document tracking, highlighting, formatting
//! and the diagnostics relay on top of it.

pub mod codec;
pub mod format;
pub mod relay;
pub mod types;

pub(crate) mod protocol;

mod client;
mod diagnostics;
mod error;
mod session;

pub use client::TtxClient;
pub use diagnostics::DiagnosticsStore;
pub use error::{ClientError, SessionError};
pub use protocol::{PathToUriError, file_uri_to_path, path_to_file_uri};
pub use relay::{DiagnosticsSink, Relay};
pub use session::Session;
pub use types::{
    AnalyzerConfig, Diagnostic, DiagnosticSeverity, DiagnosticsSnapshot, FileChangeType,
    LspEvent, MessageLevel, SessionState, TextEdit, TransportKind,
};
