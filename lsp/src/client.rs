//! `TtxClient` facade: the API an editor host drives.
//!
//! Ties the session to the documents the host has open, the token decoder,
//! the formatting bridge and the relay. Every method takes `&self`, so a
//! host may keep a `tokenize` running while it formats or edits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use ttx_highlight::{Decoded, Legend, LineIndex, SemanticTokens};

use crate::diagnostics::DiagnosticsStore;
use crate::error::ClientError;
use crate::format;
use crate::protocol;
use crate::relay::{DiagnosticsSink, Relay};
use crate::session::Session;
use crate::types::{
    AnalyzerConfig, DiagnosticsSnapshot, FileChangeType, SessionState, TextEdit,
};

/// An open document as last sent to the analyzer.
struct Document {
    text: String,
    version: i32,
    /// Sequence number of the newest `tokenize` issued for this document.
    latest_tokenize: u64,
}

/// Build the watcher globs, one `**/*.<ext>` per extension.
fn build_watch_globs(extensions: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for ext in extensions {
        match Glob::new(&format!("**/*.{ext}")) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => tracing::warn!("Ignoring file extension '{ext}': {e}"),
        }
    }
    builder.build().unwrap_or_else(|e| {
        tracing::warn!("Failed to build file watcher: {e}");
        GlobSet::empty()
    })
}

pub struct TtxClient<S = DiagnosticsStore> {
    session: Session,
    relay: Mutex<Relay<S>>,
    documents: tokio::sync::Mutex<HashMap<String, Document>>,
    tokenize_seq: AtomicU64,
    watched: GlobSet,
}

impl TtxClient<DiagnosticsStore> {
    /// A stopped client that keeps diagnostics in a [`DiagnosticsStore`].
    pub fn new(config: AnalyzerConfig, workspace_root: impl Into<PathBuf>) -> Self {
        Self::with_sink(config, workspace_root, DiagnosticsStore::new())
    }

    /// Snapshot of every diagnostic relayed so far.
    ///
    /// Only events already drained by [`poll_events`](Self::poll_events) are
    /// included.
    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.inspect_sink(DiagnosticsStore::snapshot)
    }
}

impl<S: DiagnosticsSink> TtxClient<S> {
    pub fn with_sink(config: AnalyzerConfig, workspace_root: impl Into<PathBuf>, sink: S) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let watched = build_watch_globs(&config.file_extensions);
        Self {
            session: Session::new(config, workspace_root, events_tx),
            relay: Mutex::new(Relay::new(events_rx, sink)),
            documents: tokio::sync::Mutex::new(HashMap::new()),
            tokenize_seq: AtomicU64::new(0),
            watched,
        }
    }

    /// Directory a relative analyzer command resolves against.
    #[must_use]
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.session = self.session.with_base_dir(base_dir);
        self
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn state(&self) -> SessionState {
        self.session.state().await
    }

    /// The legend to register with the rendering host.
    #[must_use]
    pub fn legend(&self) -> Legend {
        Legend::standard()
    }

    /// Launch the analyzer, then reopen every document the host still has
    /// open.
    pub async fn start(&self) -> Result<(), ClientError> {
        let started = self.session.start().await;
        self.poll_events(usize::MAX);
        started?;
        self.reopen_documents().await
    }

    /// Like [`start`](Self::start), over an existing connection.
    pub async fn attach<R, W>(&self, reader: R, writer: W) -> Result<(), ClientError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let attached = self.session.attach(reader, writer).await;
        self.poll_events(usize::MAX);
        attached?;
        self.reopen_documents().await
    }

    pub async fn stop(&self) {
        self.session.stop().await;
        self.poll_events(usize::MAX);
    }

    pub async fn restart(&self) -> Result<(), ClientError> {
        self.stop().await;
        self.start().await
    }

    /// Drain queued session events into the log and the sink.
    pub fn poll_events(&self, budget: usize) -> usize {
        self.lock_relay().poll_events(budget)
    }

    /// Read the sink under the relay lock.
    pub fn inspect_sink<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(self.lock_relay().sink())
    }

    /// Open `uri`. A document that is already open is changed instead, so
    /// the analyzer never sees a second `didOpen`.
    pub async fn open_document(&self, uri: &str, text: &str) -> Result<(), ClientError> {
        self.sync_document(uri, text).await
    }

    /// Replace the text of `uri`. A document not yet open is opened.
    pub async fn change_document(&self, uri: &str, text: &str) -> Result<(), ClientError> {
        self.sync_document(uri, text).await
    }

    async fn sync_document(&self, uri: &str, text: &str) -> Result<(), ClientError> {
        let mut documents = self.documents.lock().await;
        let (method, params) = if let Some(document) = documents.get_mut(uri) {
            document.version += 1;
            document.text = text.to_string();
            (
                "textDocument/didChange",
                protocol::did_change_params(uri, document.version, text),
            )
        } else {
            documents.insert(
                uri.to_string(),
                Document {
                    text: text.to_string(),
                    version: 1,
                    latest_tokenize: 0,
                },
            );
            (
                "textDocument/didOpen",
                protocol::did_open_params(uri, &self.session.config().language_id, 1, text),
            )
        };
        self.session.notify(method, Some(params)).await?;
        Ok(())
    }

    /// Forget `uri`. Closing a document that isn't open does nothing.
    pub async fn close_document(&self, uri: &str) -> Result<(), ClientError> {
        let mut documents = self.documents.lock().await;
        if documents.remove(uri).is_none() {
            return Ok(());
        }
        self.session
            .notify("textDocument/didClose", Some(protocol::did_close_params(uri)))
            .await?;
        Ok(())
    }

    /// Tokenize `uri` and decode the reply into single-line spans.
    ///
    /// Returns `Ok(None)` when a newer `tokenize` for the same document was
    /// issued before this one's reply arrived.
    pub async fn highlight_spans(&self, uri: &str) -> Result<Option<Decoded>, ClientError> {
        let (text, seq) = {
            let mut documents = self.documents.lock().await;
            let document = documents
                .get_mut(uri)
                .ok_or_else(|| ClientError::UnknownDocument(uri.to_string()))?;
            let seq = self.tokenize_seq.fetch_add(1, Ordering::Relaxed) + 1;
            document.latest_tokenize = seq;
            (document.text.clone(), seq)
        };

        let batch = self.session.tokenize(&text).await?;

        let latest = self
            .documents
            .lock()
            .await
            .get(uri)
            .is_some_and(|document| document.latest_tokenize == seq);
        if !latest {
            tracing::debug!(uri, seq, "Discarding superseded tokenize reply");
            return Ok(None);
        }

        tracing::debug!(
            uri,
            alternate = batch.uses_alternate_namespace,
            tokens = batch.tokens.len(),
            "Decoding tokenize reply"
        );
        // Decode against the text that was tokenized, not whatever is open now.
        let decoded = ttx_highlight::decode(&batch, &LineIndex::new(&text))?;
        Ok(Some(decoded))
    }

    /// Semantic tokens of `uri`, encoded against [`legend`](Self::legend).
    pub async fn semantic_tokens(&self, uri: &str) -> Result<Option<SemanticTokens>, ClientError> {
        let decoded = self.highlight_spans(uri).await?;
        Ok(decoded.map(|decoded| ttx_highlight::encode(&decoded.spans)))
    }

    /// Format `uri`. On success the result is exactly one edit replacing the
    /// whole document.
    pub async fn format(&self, uri: &str) -> Result<Vec<TextEdit>, ClientError> {
        let text = self
            .documents
            .lock()
            .await
            .get(uri)
            .map(|document| document.text.clone())
            .ok_or_else(|| ClientError::UnknownDocument(uri.to_string()))?;

        let name = protocol::file_uri_to_path(uri)
            .map_or_else(|| uri.to_string(), |path| path.display().to_string());
        let edit = format::format_document(&self.session, &text, &name).await?;
        Ok(vec![edit])
    }

    /// Forward file-system events for watched files to the analyzer.
    /// Returns how many were forwarded.
    pub async fn watched_files_changed(
        &self,
        events: &[(PathBuf, FileChangeType)],
    ) -> Result<usize, ClientError> {
        let changes: Vec<(String, FileChangeType)> = events
            .iter()
            .filter(|(path, _)| self.is_watched(path))
            .filter_map(|(path, kind)| match protocol::path_to_file_uri(path) {
                Ok(uri) => Some((uri.to_string(), *kind)),
                Err(e) => {
                    tracing::warn!("Skipping watched file event: {e}");
                    None
                }
            })
            .collect();

        if changes.is_empty() {
            return Ok(0);
        }
        self.session
            .notify(
                "workspace/didChangeWatchedFiles",
                Some(protocol::did_change_watched_files_params(&changes)),
            )
            .await?;
        Ok(changes.len())
    }

    #[must_use]
    pub fn is_watched(&self, path: &Path) -> bool {
        self.watched.is_match(path)
    }

    /// Version last sent for `uri`, if it is open.
    pub async fn document_version(&self, uri: &str) -> Option<i32> {
        self.documents.lock().await.get(uri).map(|d| d.version)
    }

    async fn reopen_documents(&self) -> Result<(), ClientError> {
        let documents = self.documents.lock().await;
        let language_id = &self.session.config().language_id;
        for (uri, document) in documents.iter() {
            let params =
                protocol::did_open_params(uri, language_id, document.version, &document.text);
            self.session
                .notify("textDocument/didOpen", Some(params))
                .await?;
        }
        Ok(())
    }

    fn lock_relay(&self) -> MutexGuard<'_, Relay<S>> {
        self.relay.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
