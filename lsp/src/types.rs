//! Public types consumed by hosts of the client.
//!
//! A host constructs an [`AnalyzerConfig`], receives [`LspEvent`]s through the
//! relay, and reads [`DiagnosticsSnapshot`]s or applies [`TextEdit`]s.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ttx_highlight::{LineIndex, Range};

const fn default_request_timeout_ms() -> u64 {
    30_000
}

const fn default_shutdown_timeout_ms() -> u64 {
    2_000
}

fn default_command() -> PathBuf {
    PathBuf::from("ttx-lang-server")
}

fn default_language_id() -> String {
    String::from("tetrodotoxin")
}

fn default_file_extensions() -> Vec<String> {
    vec![String::from("ttx")]
}

/// How the client talks to the analyzer process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Unix socket handed to the analyzer as `--pipe=<path>`.
    #[default]
    Pipe,
    /// Framed JSON-RPC on the analyzer's stdin/stdout.
    Stdio,
}

/// Configuration for the analyzer process and its session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Analyzer executable. Relative paths resolve against the base directory
    /// given at start; bare names are looked up on `PATH`.
    pub command: PathBuf,
    pub args: Vec<String>,
    pub transport: TransportKind,
    /// LSP language identifier sent with `didOpen`.
    pub language_id: String,
    /// Extensions (without dot) of files the analyzer watches.
    pub file_extensions: Vec<String>,
    pub request_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            transport: TransportKind::default(),
            language_id: default_language_id(),
            file_extensions: default_file_extensions(),
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl AnalyzerConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
        })
    }
}

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from LSP numeric severity (1=Error, 2=Warning, 3=Info, 4=Hint).
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// A diagnostic exactly as the analyzer published it.
///
/// Fields the client does not interpret are kept in `extra` so republishing
/// is lossless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    range: Range,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    severity: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    message: String,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(range: Range, severity: Option<DiagnosticSeverity>, message: impl Into<String>) -> Self {
        Self {
            range,
            severity: severity.map(|s| s as u64),
            code: None,
            source: None,
            message: message.into(),
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    /// Severity, if present and within the LSP-defined range.
    #[must_use]
    pub fn severity(&self) -> Option<DiagnosticSeverity> {
        self.severity.and_then(DiagnosticSeverity::from_lsp)
    }

    #[must_use]
    pub fn code(&self) -> Option<&serde_json::Value> {
        self.code.as_ref()
    }

    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Format as `path:line:col: severity: message` (1-indexed for display).
    /// A missing severity is shown as an error, which is how editors treat it.
    #[must_use]
    pub fn display_with_path(&self, path: &std::path::Path) -> String {
        let severity = self.severity().unwrap_or(DiagnosticSeverity::Error);
        format!(
            "{}:{}:{}: {}: {}",
            path.display(),
            self.range.start.line + 1,
            self.range.start.character + 1,
            severity.label(),
            self.message,
        )
    }
}

/// Level of a `window/logMessage` or `window/showMessage` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Error,
    Warning,
    Info,
    Log,
}

impl MessageLevel {
    #[must_use]
    pub fn from_lsp(value: u8) -> Self {
        match value {
            1 => Self::Error,
            2 => Self::Warning,
            3 => Self::Info,
            _ => Self::Log,
        }
    }
}

/// Kind of a watched file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeType {
    Created,
    Changed,
    Deleted,
}

impl FileChangeType {
    #[must_use]
    pub fn to_lsp(self) -> u8 {
        match self {
            Self::Created => 1,
            Self::Changed => 2,
            Self::Deleted => 3,
        }
    }
}

/// A replacement of one range of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEdit {
    pub range: Range,
    pub new_text: String,
}

impl TextEdit {
    /// Apply the edit to `text`. Returns `None` if the range lies outside it.
    #[must_use]
    pub fn apply(&self, text: &str) -> Option<String> {
        let index = LineIndex::new(text);
        let start = index.offset(text, self.range.start)?;
        let end = index.offset(text, self.range.end)?;
        if end < start {
            return None;
        }
        let mut out = String::with_capacity(text.len() - (end - start) + self.new_text.len());
        out.push_str(&text[..start]);
        out.push_str(&self.new_text);
        out.push_str(&text[end..]);
        Some(out)
    }
}

/// An event emitted by a session.
#[derive(Debug, Clone)]
pub enum LspEvent {
    /// Session lifecycle transition, in the order it happened.
    StateChanged {
        old: SessionState,
        new: SessionState,
    },
    /// A `textDocument/publishDiagnostics` batch, untouched.
    Diagnostics {
        uri: String,
        diagnostics: Vec<Diagnostic>,
    },
    /// A log or show-message notification from the analyzer.
    Message { level: MessageLevel, message: String },
}

/// Immutable snapshot of all diagnostics, suitable for display.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    /// Per-document diagnostics, error-containing documents first.
    files: Vec<(String, Vec<Diagnostic>)>,
}

impl DiagnosticsSnapshot {
    pub(crate) fn new(files: Vec<(String, Vec<Diagnostic>)>) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[(String, Vec<Diagnostic>)] {
        &self.files
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn count_by_severity(&self, severity: DiagnosticSeverity) -> usize {
        self.files
            .iter()
            .flat_map(|(_, items)| items)
            .filter(|d| d.severity() == Some(severity))
            .count()
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Error)
    }

    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.count_by_severity(DiagnosticSeverity::Warning)
    }

    #[must_use]
    pub fn total_count(&self) -> usize {
        self.files.iter().map(|(_, items)| items.len()).sum()
    }

    /// Compact status string like "E:3 W:5".
    #[must_use]
    pub fn status_string(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        format!("E:{} W:{}", self.error_count(), self.warning_count())
    }
}
