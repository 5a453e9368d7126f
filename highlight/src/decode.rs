//! Token decoder: analyzer tokens to single-line highlight spans.
//!
//! Renderers address one highlight per line, so a token covering several
//! lines is split at physical line boundaries:
//!
//! ```text
//! token (2,5)..(4,3), line 2 is 20 wide, line 3 is 10 wide
//!
//!   line 2: [5, 20)     first line, start column to end of line
//!   line 3: [0, 10)     interior lines, fully covered
//!   line 4: [0, 3)      last line, column 0 to end column
//! ```
//!
//! Output keeps input order; nothing is sorted or merged.

use serde::Serialize;

use crate::legend::{self, DisplayCategory};
use crate::text::{LineLengths, Position};
use crate::token::{Token, TokenBatch};

/// A highlight confined to one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HighlightSpan {
    category: DisplayCategory,
    line: u32,
    start_character: u32,
    end_character: u32,
}

impl HighlightSpan {
    #[must_use]
    pub const fn new(
        category: DisplayCategory,
        line: u32,
        start_character: u32,
        end_character: u32,
    ) -> Self {
        Self {
            category,
            line,
            start_character,
            end_character,
        }
    }

    #[must_use]
    pub const fn category(&self) -> DisplayCategory {
        self.category
    }

    #[must_use]
    pub const fn line(&self) -> u32 {
        self.line
    }

    #[must_use]
    pub const fn start(&self) -> Position {
        Position::new(self.line, self.start_character)
    }

    /// Always on the same line as [`start`](Self::start).
    #[must_use]
    pub const fn end(&self) -> Position {
        Position::new(self.line, self.end_character)
    }

    #[must_use]
    pub const fn len(&self) -> u32 {
        self.end_character.saturating_sub(self.start_character)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(line, start, line, end)`, the shape the analyzer uses for tokens.
    #[must_use]
    pub const fn coordinates(&self) -> (u32, u32, u32, u32) {
        (
            self.line,
            self.start_character,
            self.line,
            self.end_character,
        )
    }
}

impl Serialize for HighlightSpan {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            self.category.to_string(),
            self.line,
            self.start_character,
            self.line,
            self.end_character,
        )
            .serialize(serializer)
    }
}

/// A batch that violates the token invariants. The whole batch is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedBatch {
    #[error("token {index} ends before it starts: {token:?}")]
    InvertedRange { index: usize, token: Token },
    #[error("token {index} has zero width: {token:?}")]
    EmptyToken { index: usize, token: Token },
    #[error("token {index} references line {line}, which the document does not have")]
    LineOutOfRange { index: usize, line: u32 },
    #[error("token {index} references column {column} past the end of line {line}")]
    ColumnOutOfRange { index: usize, line: u32, column: u32 },
}

impl MalformedBatch {
    /// Index of the offending token in the batch.
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            Self::InvertedRange { index, .. }
            | Self::EmptyToken { index, .. }
            | Self::LineOutOfRange { index, .. }
            | Self::ColumnOutOfRange { index, .. } => *index,
        }
    }
}

/// Spans produced from one batch, plus the identifiers of dropped tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    pub spans: Vec<HighlightSpan>,
    /// Flat identifiers (e.g. `cppXyz`) of tokens skipped as unknown.
    pub unknown: Vec<String>,
}

/// Decode a batch against the line lengths of the document it was computed
/// from.
///
/// Unknown kind codes drop their token and are logged; any invariant
/// violation fails the batch.
pub fn decode(batch: &TokenBatch, lines: &impl LineLengths) -> Result<Decoded, MalformedBatch> {
    let namespace = batch.namespace();
    let mut decoded = Decoded::default();

    for (index, token) in batch.tokens.iter().enumerate() {
        if let Err(err) = validate(index, token, lines) {
            tracing::warn!(index, token = ?token, "{err}");
            return Err(err);
        }

        let category = match legend::resolve(namespace, token.kind()) {
            Ok(category) => category,
            Err(unknown) => {
                tracing::warn!("{unknown}");
                decoded.unknown.push(unknown.identifier().to_string());
                continue;
            }
        };

        split(token, category, lines, &mut decoded.spans);
    }

    Ok(decoded)
}

fn validate(index: usize, token: &Token, lines: &impl LineLengths) -> Result<(), MalformedBatch> {
    let (start, end) = (token.start(), token.end());
    if end.line < start.line {
        return Err(MalformedBatch::InvertedRange {
            index,
            token: token.clone(),
        });
    }
    if end.line == start.line && end.character <= start.character {
        return Err(MalformedBatch::EmptyToken {
            index,
            token: token.clone(),
        });
    }
    for line in start.line..=end.line {
        if lines.line_len(line).is_none() {
            return Err(MalformedBatch::LineOutOfRange { index, line });
        }
    }

    // A multi-line token may start exactly at the end of its first line.
    let width = |line| lines.line_len(line).unwrap_or_default();
    let bad = if token.is_multiline() && start.character > width(start.line) {
        Some(start)
    } else if end.character > width(end.line) {
        Some(end)
    } else {
        None
    };
    match bad {
        Some(position) => Err(MalformedBatch::ColumnOutOfRange {
            index,
            line: position.line,
            column: position.character,
        }),
        None => Ok(()),
    }
}

/// Emit the spans for one validated token.
fn split(
    token: &Token,
    category: DisplayCategory,
    lines: &impl LineLengths,
    out: &mut Vec<HighlightSpan>,
) {
    let (start, end) = (token.start(), token.end());
    if !token.is_multiline() {
        out.push(HighlightSpan::new(
            category,
            start.line,
            start.character,
            end.character,
        ));
        return;
    }

    // Lines were checked by `validate`.
    let width = |line| lines.line_len(line).unwrap_or_default();

    out.push(HighlightSpan::new(
        category,
        start.line,
        start.character,
        width(start.line),
    ));
    for line in start.line + 1..end.line {
        out.push(HighlightSpan::new(category, line, 0, width(line)));
    }
    out.push(HighlightSpan::new(category, end.line, 0, end.character));
}
