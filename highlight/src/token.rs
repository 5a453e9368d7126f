//! Wire form of an analyzer `tokenize` reply.

use serde::{Deserialize, Serialize};

use crate::legend::Namespace;
use crate::text::Position;

/// Kind code as sent on the wire: usually a short string, occasionally an
/// integer.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireKind {
    Text(String),
    Number(u64),
}

impl From<WireKind> for String {
    fn from(kind: WireKind) -> Self {
        match kind {
            WireKind::Text(text) => text,
            WireKind::Number(n) => n.to_string(),
        }
    }
}

type WireToken = (WireKind, u32, u32, u32, u32);
type OutgoingToken = (String, u32, u32, u32, u32);

/// One token as reported by the analyzer:
/// `[kindCode, startLine, startColumn, endLine, endColumn]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "WireToken", into = "OutgoingToken")]
pub struct Token {
    kind: String,
    start: Position,
    end: Position,
}

impl Token {
    #[must_use]
    pub fn new(kind: impl Into<String>, start: Position, end: Position) -> Self {
        Self {
            kind: kind.into(),
            start,
            end,
        }
    }

    /// Opaque kind code, resolved against a namespace by the decoder.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn start(&self) -> Position {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> Position {
        self.end
    }

    #[must_use]
    pub fn is_multiline(&self) -> bool {
        self.end.line > self.start.line
    }
}

impl From<WireToken> for Token {
    fn from((kind, start_line, start_col, end_line, end_col): WireToken) -> Self {
        Self::new(
            kind,
            Position::new(start_line, start_col),
            Position::new(end_line, end_col),
        )
    }
}

impl From<Token> for OutgoingToken {
    fn from(token: Token) -> Self {
        (
            token.kind,
            token.start.line,
            token.start.character,
            token.end.line,
            token.end.character,
        )
    }
}

/// Boolean flag that older analyzers print as `0`/`1`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum WireFlag {
    Bool(bool),
    Int(u64),
}

impl WireFlag {
    fn is_set(self) -> bool {
        match self {
            Self::Bool(b) => b,
            Self::Int(n) => n != 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBatch {
    uses_alternate_namespace: Option<WireFlag>,
    /// Older analyzers send `color`, set when the primary namespace applies.
    color: Option<WireFlag>,
    #[serde(default)]
    tokens: Vec<Token>,
}

impl From<WireBatch> for TokenBatch {
    fn from(wire: WireBatch) -> Self {
        let uses_alternate_namespace = match (wire.uses_alternate_namespace, wire.color) {
            (Some(flag), _) => flag.is_set(),
            (None, Some(color)) => !color.is_set(),
            (None, None) => false,
        };
        Self {
            uses_alternate_namespace,
            tokens: wire.tokens,
        }
    }
}

/// Result of one `tokenize` request. A batch is drawn entirely from one
/// namespace.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(from = "WireBatch", rename_all = "camelCase")]
pub struct TokenBatch {
    pub uses_alternate_namespace: bool,
    pub tokens: Vec<Token>,
}

impl TokenBatch {
    #[must_use]
    pub fn namespace(&self) -> Namespace {
        Namespace::from_alternate_flag(self.uses_alternate_namespace)
    }
}
