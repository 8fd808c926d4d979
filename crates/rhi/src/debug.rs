//! Warning channel for conditions the engine absorbs instead of failing.

use log::{error, info, warn};

/// Severity of a message reported through a [`DebugSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Receives messages about skipped or degraded work.
///
/// Devices own one sink and hand it to every recorder they create.
pub trait DebugSink: Send + Sync {
    /// Report a single message.
    fn message(&self, severity: Severity, text: &str);
}

/// Default sink that forwards everything to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl DebugSink for LogSink {
    fn message(&self, severity: Severity, text: &str) {
        match severity {
            Severity::Info => info!(target: "rhi", "{text}"),
            Severity::Warning => warn!(target: "rhi", "{text}"),
            Severity::Error => error!(target: "rhi", "{text}"),
        }
    }
}
