//! Diagnostics/lifecycle relay.
//!
//! Consumes the session's event stream, records every state transition and
//! diagnostics batch in the log, and republishes diagnostics unchanged to a
//! [`DiagnosticsSink`].

use tokio::sync::mpsc;

use crate::diagnostics::DiagnosticsStore;
use crate::types::{Diagnostic, LspEvent, MessageLevel, SessionState};

/// Host surface that displays diagnostics.
pub trait DiagnosticsSink: Send {
    /// Replace the diagnostics shown for `uri`. An empty slice clears them.
    fn publish(&mut self, uri: &str, diagnostics: &[Diagnostic]);
}

impl<S: DiagnosticsSink + ?Sized> DiagnosticsSink for Box<S> {
    fn publish(&mut self, uri: &str, diagnostics: &[Diagnostic]) {
        (**self).publish(uri, diagnostics);
    }
}

pub struct Relay<S = DiagnosticsStore> {
    events: mpsc::UnboundedReceiver<LspEvent>,
    sink: S,
    state: SessionState,
}

impl<S: DiagnosticsSink> Relay<S> {
    pub fn new(events: mpsc::UnboundedReceiver<LspEvent>, sink: S) -> Self {
        Self {
            events,
            sink,
            state: SessionState::Stopped,
        }
    }

    /// Last session state observed through the event stream.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Handle up to `budget` queued events without waiting.
    /// Returns the number handled.
    pub fn poll_events(&mut self, budget: usize) -> usize {
        let mut handled = 0;
        while handled < budget {
            match self.events.try_recv() {
                Ok(event) => {
                    self.handle_event(event);
                    handled += 1;
                }
                Err(_) => break,
            }
        }
        handled
    }

    /// Handle events until every sender is gone, then hand back the sink.
    pub async fn run(mut self) -> S {
        while let Some(event) = self.events.recv().await {
            self.handle_event(event);
        }
        self.sink
    }

    pub fn handle_event(&mut self, event: LspEvent) {
        match event {
            LspEvent::StateChanged { old, new } => {
                tracing::info!("Client state changed: {old} -> {new}");
                self.state = new;
            }
            LspEvent::Diagnostics { uri, diagnostics } => {
                tracing::info!("Received diagnostics for {uri}:");
                for diagnostic in &diagnostics {
                    tracing::info!("{}", diagnostic.message());
                }
                self.sink.publish(&uri, &diagnostics);
            }
            LspEvent::Message { level, message } => match level {
                MessageLevel::Error => tracing::error!(target: "analyzer", "{message}"),
                MessageLevel::Warning => tracing::warn!(target: "analyzer", "{message}"),
                MessageLevel::Info => tracing::info!(target: "analyzer", "{message}"),
                MessageLevel::Log => tracing::debug!(target: "analyzer", "{message}"),
            },
        }
    }
}
