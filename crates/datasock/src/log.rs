//! # Logging capability
//!
//! Components receive an `Arc<dyn Log>` instead of reaching for a global
//! logger, so an embedding application (or a test) decides where messages go.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

/// The three levels the data socket emits.
pub trait Log: Send + Sync + 'static {
    /// Internal detail, silent by default.
    fn debug(&self, message: &str);

    /// Connection lifecycle: connects, resets, closes.
    fn info(&self, message: &str);

    /// A failure the socket could not recover from on its own.
    fn fatal(&self, message: &str);
}

/// Forwards to `tracing`, tagging every event with the socket's destination.
#[derive(Clone, Debug)]
pub struct TracingLog {
    socket: String,
}

impl TracingLog {
    pub fn new(socket: impl Into<String>) -> Self {
        Self { socket: socket.into() }
    }
}

impl Log for TracingLog {
    fn debug(&self, message: &str) {
        tracing::debug!(socket = %self.socket, "{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!(socket = %self.socket, "{}", message);
    }

    fn fatal(&self, message: &str) {
        tracing::error!(socket = %self.socket, "{}", message);
    }
}

/// Captures log lines in memory for testing and inspection.
#[derive(Clone, Debug, Default)]
pub struct MemoryLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all captured lines, formatted `[level] message`.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// True if any captured line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }

    fn push(&self, level: &str, message: &str) {
        let mut guard = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        guard.push(format!("[{}] {}", level, message));
    }
}

impl Log for MemoryLog {
    fn debug(&self, message: &str) {
        self.push("debug", message);
    }

    fn info(&self, message: &str) {
        self.push("info", message);
    }

    fn fatal(&self, message: &str) {
        self.push("fatal", message);
    }
}
