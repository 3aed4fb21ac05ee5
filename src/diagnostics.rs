//! Explicit diagnostic sinks.
//!
//! Every component takes a `&mut dyn DiagnosticSink` and reports through it
//! instead of printing. The binary uses [`TracingSink`]; tests usually collect
//! into a `Vec<Diagnostic>`.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub level: Level,
    /// Short component tag, e.g. `schema`, `scanner`, `mutation`
    pub component: &'static str,
    pub message: String,
}

pub trait DiagnosticSink {
    fn emit(&mut self, diagnostic: Diagnostic);

    fn debug(&mut self, component: &'static str, message: String) {
        self.emit(Diagnostic {
            level: Level::Debug,
            component,
            message,
        });
    }

    fn info(&mut self, component: &'static str, message: String) {
        self.emit(Diagnostic {
            level: Level::Info,
            component,
            message,
        });
    }

    fn warn(&mut self, component: &'static str, message: String) {
        self.emit(Diagnostic {
            level: Level::Warn,
            component,
            message,
        });
    }

    fn error(&mut self, component: &'static str, message: String) {
        self.emit(Diagnostic {
            level: Level::Error,
            component,
            message,
        });
    }
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn emit(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&mut self, _diagnostic: Diagnostic) {}
}

/// Forwards to `tracing` and keeps a copy so the run log can be handed back.
#[derive(Debug, Default)]
pub struct TracingSink {
    pub recorded: Vec<Diagnostic>,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Vec<Diagnostic> {
        self.recorded
    }
}

impl DiagnosticSink for TracingSink {
    fn emit(&mut self, diagnostic: Diagnostic) {
        let component = diagnostic.component;
        match diagnostic.level {
            Level::Debug => tracing::debug!(component = component, "{}", diagnostic.message),
            Level::Info => tracing::info!(component = component, "{}", diagnostic.message),
            Level::Warn => tracing::warn!(component = component, "{}", diagnostic.message),
            Level::Error => tracing::error!(component = component, "{}", diagnostic.message),
        }
        self.recorded.push(diagnostic);
    }
}

/// Passes everything on to another sink and keeps a copy for the run result.
pub struct Recording<'a> {
    inner: &'a mut dyn DiagnosticSink,
    recorded: Vec<Diagnostic>,
}

impl<'a> Recording<'a> {
    pub fn new(inner: &'a mut dyn DiagnosticSink) -> Self {
        Self {
            inner,
            recorded: Vec::new(),
        }
    }

    pub fn into_log(self) -> Vec<Diagnostic> {
        self.recorded
    }
}

impl DiagnosticSink for Recording<'_> {
    fn emit(&mut self, diagnostic: Diagnostic) {
        self.recorded.push(diagnostic.clone());
        self.inner.emit(diagnostic);
    }
}

/// Number of diagnostics at `level` or above.
pub fn count_at_least(diagnostics: &[Diagnostic], level: Level) -> usize {
    diagnostics.iter().filter(|d| d.level >= level).count()
}
