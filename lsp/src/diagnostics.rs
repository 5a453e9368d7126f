//! Diagnostics store: the latest published diagnostics of every document.

use std::collections::HashMap;

use crate::relay::DiagnosticsSink;
use crate::types::{Diagnostic, DiagnosticSeverity, DiagnosticsSnapshot};

/// Default sink. A publication replaces everything previously known about
/// its document; an empty one clears it.
#[derive(Debug, Default)]
pub struct DiagnosticsStore {
    data: HashMap<String, Vec<Diagnostic>>,
}

impl DiagnosticsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, uri: String, items: Vec<Diagnostic>) {
        if items.is_empty() {
            self.data.remove(&uri);
        } else {
            self.data.insert(uri, items);
        }
    }

    /// Diagnostics of one document, in the order the analyzer sent them.
    #[must_use]
    pub fn get(&self, uri: &str) -> &[Diagnostic] {
        self.data.get(uri).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut files: Vec<(String, Vec<Diagnostic>)> = self
            .data
            .iter()
            .map(|(uri, items)| (uri.clone(), items.clone()))
            .collect();

        // Documents with errors first, then by URI.
        files.sort_by(|a, b| {
            has_errors(&b.1)
                .cmp(&has_errors(&a.1))
                .then_with(|| a.0.cmp(&b.0))
        });

        DiagnosticsSnapshot::new(files)
    }

    /// Error diagnostics of the given documents, skipping clean ones.
    #[must_use]
    pub fn errors_for(&self, uris: &[String]) -> Vec<(String, Vec<Diagnostic>)> {
        uris.iter()
            .filter_map(|uri| {
                let errors: Vec<Diagnostic> = self
                    .get(uri)
                    .iter()
                    .filter(|d| is_error(d))
                    .cloned()
                    .collect();
                (!errors.is_empty()).then(|| (uri.clone(), errors))
            })
            .collect()
    }
}

impl DiagnosticsSink for DiagnosticsStore {
    fn publish(&mut self, uri: &str, diagnostics: &[Diagnostic]) {
        self.update(uri.to_string(), diagnostics.to_vec());
    }
}

/// Missing severity counts as an error.
fn is_error(diagnostic: &Diagnostic) -> bool {
    diagnostic
        .severity()
        .is_none_or(DiagnosticSeverity::is_error)
}

fn has_errors(items: &[Diagnostic]) -> bool {
    items.iter().any(is_error)
}
