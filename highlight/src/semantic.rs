//! LSP semantic-token encoding of decoded spans.

use serde::Serialize;

use crate::decode::HighlightSpan;

/// `textDocument/semanticTokens/full` result body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticTokens {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
    pub data: Vec<u32>,
}

impl SemanticTokens {
    /// Number of encoded spans.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() / 5
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Delta-encode spans as `[deltaLine, deltaStart, length, type, modifiers]`
/// quintuples.
///
/// Delta encoding needs positions in document order, so spans are stably
/// ordered by start position first; spans at the same position keep their
/// decoded order.
#[must_use]
pub fn encode(spans: &[HighlightSpan]) -> SemanticTokens {
    let mut ordered: Vec<&HighlightSpan> = spans.iter().collect();
    ordered.sort_by_key(|span| span.start());

    let mut data = Vec::with_capacity(ordered.len() * 5);
    let mut prev_line = 0u32;
    let mut prev_char = 0u32;

    for span in ordered {
        let start = span.start();
        let delta_line = start.line - prev_line;
        let delta_start = if delta_line == 0 {
            start.character - prev_char
        } else {
            start.character
        };

        data.extend_from_slice(&[
            delta_line,
            delta_start,
            span.len(),
            span.category().legend_index(),
            0,
        ]);

        prev_line = start.line;
        prev_char = start.character;
    }

    SemanticTokens {
        result_id: None,
        data,
    }
}
