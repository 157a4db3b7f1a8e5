//! Injectable diagnostic logging.
//!
//! The library always emits `tracing` events. Callers that need the messages
//! routed elsewhere (for example into their own SDK's debug log) can hand a
//! [`DiagnosticLogger`] to [`ReaderConfig`](crate::ReaderConfig); no global
//! state is involved.

use std::fmt;
use std::sync::Arc;

/// Severity of a diagnostic message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Detailed resolution steps
    Debug,
    /// Notable but expected events
    Info,
    /// Something looks off, but reading can continue
    Warning,
}

/// Sink for diagnostic messages produced while reading an archive
pub trait DiagnosticLogger: Send + Sync {
    /// Receives one formatted message
    fn log(&self, level: LogLevel, message: &str);
}

impl<F> DiagnosticLogger for F
where
    F: Fn(LogLevel, &str) + Send + Sync,
{
    fn log(&self, level: LogLevel, message: &str) {
        self(level, message)
    }
}

/// Handle passed down to the readers; forwards to `tracing` and the optional sink.
#[derive(Clone, Default)]
pub(crate) struct Diagnostics {
    sink: Option<Arc<dyn DiagnosticLogger>>,
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl Diagnostics {
    pub(crate) fn new(sink: Option<Arc<dyn DiagnosticLogger>>) -> Self {
        Self { sink }
    }

    pub(crate) fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!("{}", args);
        self.forward(LogLevel::Debug, args);
    }

    pub(crate) fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!("{}", args);
        self.forward(LogLevel::Info, args);
    }

    pub(crate) fn warn(&self, args: fmt::Arguments<'_>) {
        tracing::warn!("{}", args);
        self.forward(LogLevel::Warning, args);
    }

    fn forward(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        if let Some(sink) = &self.sink {
            sink.log(level, &args.to_string());
        }
    }
}
