//! Positions and per-line lengths of an open document.
//!
//! Columns are UTF-16 code units, the unit LSP positions use by default.

use serde::{Deserialize, Serialize};

/// Zero-based line/column position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Half-open range between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

/// Source of line lengths for the decoder.
///
/// Returns `None` for a line the document does not have.
pub trait LineLengths {
    fn line_len(&self, line: u32) -> Option<u32>;
}

impl<F> LineLengths for F
where
    F: Fn(u32) -> Option<u32>,
{
    fn line_len(&self, line: u32) -> Option<u32> {
        self(line)
    }
}

/// Line table of a document snapshot.
///
/// An empty document has one empty line; a trailing newline opens a final
/// empty line, matching how editors count lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    /// Byte offset where each line starts.
    starts: Vec<usize>,
    /// UTF-16 length of each line, terminator excluded.
    lengths: Vec<u32>,
}

impl LineIndex {
    #[must_use]
    pub fn new(text: &str) -> Self {
        let mut starts = vec![0];
        let mut lengths = Vec::new();
        let mut width = 0u32;
        let mut chars = text.char_indices().peekable();

        while let Some((offset, ch)) = chars.next() {
            match ch {
                '\n' => {
                    lengths.push(width);
                    starts.push(offset + 1);
                    width = 0;
                }
                '\r' if matches!(chars.peek(), Some((_, '\n'))) => {
                    chars.next();
                    lengths.push(width);
                    starts.push(offset + 2);
                    width = 0;
                }
                _ => width += ch.len_utf16() as u32,
            }
        }
        lengths.push(width);

        Self { starts, lengths }
    }

    #[must_use]
    pub fn line_count(&self) -> u32 {
        self.lengths.len() as u32
    }

    /// Position just past the last character of the document.
    #[must_use]
    pub fn end(&self) -> Position {
        let last = self.lengths.len() - 1;
        Position::new(last as u32, self.lengths[last])
    }

    /// Range covering the whole document.
    #[must_use]
    pub fn full_range(&self) -> Range {
        Range::new(Position::default(), self.end())
    }

    /// Byte offset of `position` in `text`, which must be the text this index
    /// was built from. Columns past the end of a line clamp to the line end.
    #[must_use]
    pub fn offset(&self, text: &str, position: Position) -> Option<usize> {
        let line = position.line as usize;
        let start = *self.starts.get(line)?;
        let end = match self.starts.get(line + 1) {
            Some(&next) if text[..next].ends_with("\r\n") => next - 2,
            Some(&next) => next - 1,
            None => text.len(),
        };
        let mut units = 0u32;
        for (i, ch) in text[start..end].char_indices() {
            if units >= position.character {
                return Some(start + i);
            }
            units += ch.len_utf16() as u32;
        }
        Some(end)
    }
}

impl LineLengths for LineIndex {
    fn line_len(&self, line: u32) -> Option<u32> {
        self.lengths.get(line as usize).copied()
    }
}
