//! Formatting bridge: one `format` request, one whole-document edit.

use ttx_highlight::LineIndex;

use crate::error::SessionError;
use crate::session::Session;
use crate::types::TextEdit;

/// An edit replacing all of `original`, start to end, with `replacement`.
#[must_use]
pub fn full_document_edit(original: &str, replacement: String) -> TextEdit {
    TextEdit {
        range: LineIndex::new(original).full_range(),
        new_text: replacement,
    }
}

/// Format `text` through the analyzer.
///
/// `name` identifies the document to the analyzer (its path). Failures are
/// logged and returned; no edit is produced for them.
pub async fn format_document(
    session: &Session,
    text: &str,
    name: &str,
) -> Result<TextEdit, SessionError> {
    match session.format(text, name).await {
        Ok(document) => Ok(full_document_edit(text, document)),
        Err(err) => {
            tracing::error!(document = name, "Formatting failed: {err}");
            Err(err)
        }
    }
}
