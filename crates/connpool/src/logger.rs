//! Logging sink consumed by the pool.
//!
//! The pool reports lifecycle events (open, reuse, drain, close) through a
//! [`Logger`]. [`TracingLogger`] forwards them to `tracing` and is the default;
//! [`NoopLogger`] discards them. The pool always holds some logger, so no call
//! site needs to check for one.

use std::fmt;

/// Four-level message sink.
pub trait Logger: Send + Sync {
    fn debug(&self, args: fmt::Arguments<'_>);
    fn info(&self, args: fmt::Arguments<'_>);
    fn warn(&self, args: fmt::Arguments<'_>);
    fn error(&self, args: fmt::Arguments<'_>);
}

/// Forwards every message to the `tracing` macros under the `connpool` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(target: "connpool", "{args}");
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!(target: "connpool", "{args}");
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(target: "connpool", "{args}");
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!(target: "connpool", "{args}");
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn debug(&self, _args: fmt::Arguments<'_>) {}
    fn info(&self, _args: fmt::Arguments<'_>) {}
    fn warn(&self, _args: fmt::Arguments<'_>) {}
    fn error(&self, _args: fmt::Arguments<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn loggers_are_object_safe() {
        let sinks: Vec<Arc<dyn Logger>> = vec![Arc::new(TracingLogger), Arc::new(NoopLogger)];
        for sink in &sinks {
            sink.debug(format_args!("debug {}", 1));
            sink.info(format_args!("info"));
            sink.warn(format_args!("warn"));
            sink.error(format_args!("error"));
        }
    }

    #[test]
    fn tracing_logger_emits_under_subscriber() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            TracingLogger.info(format_args!("opened connection {}", 7));
        });
    }
}
