//! Semantic highlighting core for Tetrodotoxin editor integrations.
//!
//! This crate is pure and synchronous. It turns an analyzer `tokenize` reply
//! into renderer-safe highlights:
//!
//! - **`token`**: wire form of a token batch
//! - **`legend`**: namespace resolution and the registered category legend
//! - **`decode`**: splitting tokens into single-line spans
//! - **`semantic`**: LSP delta encoding of spans
//! - **`text`**: positions and per-line lengths of a document

pub mod decode;
pub mod legend;
pub mod semantic;
pub mod text;
pub mod token;

pub use decode::{Decoded, HighlightSpan, MalformedBatch, decode};
pub use legend::{DisplayCategory, Legend, Namespace, TokenKind, UnknownCategory, resolve};
pub use semantic::{SemanticTokens, encode};
pub use text::{LineIndex, LineLengths, Position, Range};
pub use token::{Token, TokenBatch};
