//! Structured events emitted on escalation paths.
//!
//! The engine never silently swallows an unhedged residual: every rollback
//! failure, fill timeout, or single-leg failure is both logged via `tracing`
//! and forwarded to an injected [`DiagnosticSink`], mirroring the rest of the
//! codebase's practice of treating the logger as just another collaborator
//! rather than global state.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagnosticKind {
    RollbackMarketFailed,
    RollbackException,
    OrderFillTimeout,
    SingleLegFailure,
    SplicingSafetyViolation,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticEvent {
    pub kind: DiagnosticKind,
    pub message: String,
    pub venue: Option<crate::venue::VenueTag>,
    pub symbol: Option<String>,
    pub context: Option<Value>,
}

impl DiagnosticEvent {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            venue: None,
            symbol: None,
            context: None,
        }
    }

    pub fn with_venue(mut self, venue: crate::venue::VenueTag) -> Self {
        self.venue = Some(venue);
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Optional collaborator. The engine runs correctly with [`NullDiagnosticSink`];
/// a real implementation (metrics pipeline, alerting webhook, …) is wired in
/// by the caller.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, event: DiagnosticEvent);
}

/// Discards every event. Still goes through `tracing`, so nothing is lost
/// silently even without a real sink configured — only the extra
/// out-of-band delivery is skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDiagnosticSink;

impl DiagnosticSink for NullDiagnosticSink {
    fn emit(&self, _event: DiagnosticEvent) {}
}

/// Emit to both `tracing` and the injected sink, at the severity the kind
/// implies. CRITICAL kinds (rollback failure and its downstream exception)
/// log at `error!`; the rest log at `warn!`.
pub fn escalate(sink: &dyn DiagnosticSink, event: DiagnosticEvent) {
    match event.kind {
        DiagnosticKind::RollbackMarketFailed | DiagnosticKind::RollbackException => {
            tracing::error!(
                kind = ?event.kind,
                symbol = event.symbol.as_deref().unwrap_or(""),
                venue = ?event.venue,
                "{}",
                event.message
            );
        }
        _ => {
            tracing::warn!(
                kind = ?event.kind,
                symbol = event.symbol.as_deref().unwrap_or(""),
                venue = ?event.venue,
                "{}",
                event.message
            );
        }
    }
    sink.emit(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<DiagnosticKind>>,
    }

    impl DiagnosticSink for CollectingSink {
        fn emit(&self, event: DiagnosticEvent) {
            self.events.lock().push(event.kind);
        }
    }

    #[test]
    fn escalate_forwards_to_sink() {
        let sink = CollectingSink::default();
        escalate(
            &sink,
            DiagnosticEvent::new(DiagnosticKind::SingleLegFailure, "leg A never filled"),
        );
        assert_eq!(sink.events.lock().as_slice(), &[DiagnosticKind::SingleLegFailure]);
    }
}
