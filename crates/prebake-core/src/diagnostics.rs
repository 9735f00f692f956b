//! Leveled diagnostic events and the fan-out reporter.
//!
//! Every stage of the pipeline reports through a [`Reporter`]: a small bus
//! that fans each event out to one or more [`DiagnosticSink`]s. Sink failures
//! are captured and rethrown only after all sinks have been attempted, so a
//! broken sink never starves the others.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::module_id::ModuleId;

/// Severity of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single diagnostic event, tagged by the module and line it concerns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub module: Option<ModuleId>,
    pub line: Option<u32>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            module: None,
            line: None,
            message: message.into(),
        }
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self::new(Severity::Debug, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(Severity::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Attach the module this diagnostic concerns.
    pub fn with_module(mut self, module: ModuleId) -> Self {
        self.module = Some(module);
        self
    }

    /// Attach the source line this diagnostic concerns.
    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.module, self.line) {
            (Some(module), Some(line)) => {
                write!(f, "{:?} {}:{} {}", self.severity, module, line, self.message)
            }
            (Some(module), None) => write!(f, "{:?} {} {}", self.severity, module, self.message),
            _ => write!(f, "{:?} {}", self.severity, self.message),
        }
    }
}

/// Error raised by a sink that failed to accept a diagnostic.
#[derive(Debug, Clone, Error)]
#[error("diagnostic sink '{sink}' failed: {message}")]
pub struct SinkError {
    pub sink: String,
    pub message: String,
}

impl SinkError {
    pub fn new(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            message: message.into(),
        }
    }
}

/// A destination for diagnostic events.
pub trait DiagnosticSink: Send + Sync {
    fn publish(&self, diagnostic: &Diagnostic) -> Result<(), SinkError>;
}

/// Fans diagnostics out to an ordered list of sinks.
///
/// Publishing attempts every sink even when an earlier one fails; the first
/// failure is returned after all sinks ran.
#[derive(Clone, Default)]
pub struct Reporter {
    sinks: Vec<Arc<dyn DiagnosticSink>>,
}

impl Reporter {
    pub fn new(sinks: Vec<Arc<dyn DiagnosticSink>>) -> Self {
        Self { sinks }
    }

    /// A reporter with a single [`TracingSink`].
    pub fn to_tracing() -> Self {
        Self::new(vec![Arc::new(TracingSink)])
    }

    pub fn add_sink(&mut self, sink: Arc<dyn DiagnosticSink>) {
        self.sinks.push(sink);
    }

    /// Publish a diagnostic to all sinks; swallow sink failures until every
    /// sink has been attempted, then rethrow the first one.
    pub fn publish(&self, diagnostic: &Diagnostic) -> Result<(), SinkError> {
        let mut first_failure = None;
        for sink in &self.sinks {
            if let Err(err) = sink.publish(diagnostic) {
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Publish, routing a sink failure to the process log instead of the
    /// caller. Used on dispatch paths that must not abort.
    pub fn publish_lossy(&self, diagnostic: &Diagnostic) {
        if let Err(err) = self.publish(diagnostic) {
            tracing::error!(sink = %err.sink, "diagnostic sink failure: {}", err.message);
        }
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

/// Sink that forwards diagnostics to the `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn publish(&self, diagnostic: &Diagnostic) -> Result<(), SinkError> {
        let module = diagnostic
            .module
            .as_ref()
            .map(|id| id.key().to_string())
            .unwrap_or_default();
        match diagnostic.severity {
            Severity::Debug => {
                tracing::debug!(module = %module, line = ?diagnostic.line, "{}", diagnostic.message)
            }
            Severity::Info => {
                tracing::info!(module = %module, line = ?diagnostic.line, "{}", diagnostic.message)
            }
            Severity::Warn => {
                tracing::warn!(module = %module, line = ?diagnostic.line, "{}", diagnostic.message)
            }
            Severity::Error => {
                tracing::error!(module = %module, line = ?diagnostic.line, "{}", diagnostic.message)
            }
        }
        Ok(())
    }
}

/// Sink that captures diagnostics in memory.
///
/// Used by tests and by error-module merging to inspect what was reported.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything captured so far.
    pub fn captured(&self) -> Vec<Diagnostic> {
        self.entries.lock().clone()
    }

    /// Captured diagnostics at the given severity.
    pub fn captured_at(&self, severity: Severity) -> Vec<Diagnostic> {
        self.entries
            .lock()
            .iter()
            .filter(|d| d.severity == severity)
            .cloned()
            .collect()
    }
}

impl DiagnosticSink for MemorySink {
    fn publish(&self, diagnostic: &Diagnostic) -> Result<(), SinkError> {
        self.entries.lock().push(diagnostic.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl DiagnosticSink for FailingSink {
        fn publish(&self, _diagnostic: &Diagnostic) -> Result<(), SinkError> {
            Err(SinkError::new("failing", "disk full"))
        }
    }

    #[test]
    fn fan_out_reaches_all_sinks_despite_failure() {
        let memory = Arc::new(MemorySink::new());
        let reporter = Reporter::new(vec![
            Arc::new(FailingSink),
            memory.clone() as Arc<dyn DiagnosticSink>,
        ]);

        let result = reporter.publish(&Diagnostic::warn("low disk"));

        // The failure is rethrown, but the memory sink still saw the event.
        assert!(result.is_err());
        assert_eq!(memory.captured().len(), 1);
        assert_eq!(memory.captured()[0].message, "low disk");
    }

    #[test]
    fn first_failure_wins() {
        struct NamedFail(&'static str);
        impl DiagnosticSink for NamedFail {
            fn publish(&self, _d: &Diagnostic) -> Result<(), SinkError> {
                Err(SinkError::new(self.0, "boom"))
            }
        }

        let reporter = Reporter::new(vec![
            Arc::new(NamedFail("a")) as Arc<dyn DiagnosticSink>,
            Arc::new(NamedFail("b")),
        ]);
        let err = reporter.publish(&Diagnostic::error("x")).unwrap_err();
        assert_eq!(err.sink, "a");
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
    }
}
