//! Per-invocation logging.
//!
//! Each invocation writes its host-side log into the [`LogOutput`] of its
//! configuration. Instead of registering that output in a process-wide
//! registry, the engine threads an [`InvocationLog`] through every phase:
//! each line goes to the invocation's own output and is mirrored to
//! `tracing`, so the global subscriber still sees everything.
//!
//! At the end of the invocation the output is snapshotted with
//! [`LogOutput::log`], forwarded to listeners as the host log, and closed.

pub mod stream;

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

pub use stream::{ByteArraySource, InputStreamSource, read_all};

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Verbose,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            LogLevel::Verbose => "V",
            LogLevel::Debug => "D",
            LogLevel::Info => "I",
            LogLevel::Warn => "W",
            LogLevel::Error => "E",
        };
        f.write_str(c)
    }
}

/// Destination of an invocation's host log.
pub trait LogOutput: Send + Sync {
    /// Prepares the output for a new invocation.
    fn init(&self) -> io::Result<()>;

    /// Appends one line.
    fn print_log(&self, level: LogLevel, tag: &str, message: &str);

    /// Snapshot of everything logged so far.
    fn log(&self) -> Box<dyn InputStreamSource>;

    /// Closes the output. Later lines are dropped.
    fn close_log(&self);

    /// Creates a fresh output with the same settings, for a child invocation.
    fn clone_output(&self) -> Arc<dyn LogOutput>;
}

/// [`LogOutput`] that buffers lines in memory.
pub struct MemoryLogOutput {
    min_level: LogLevel,
    state: Mutex<MemoryLogState>,
}

#[derive(Default)]
struct MemoryLogState {
    buffer: Vec<u8>,
    closed: bool,
}

impl MemoryLogOutput {
    /// Creates an output keeping lines at `min_level` or above.
    pub fn new(min_level: LogLevel) -> Self {
        Self {
            min_level,
            state: Mutex::new(MemoryLogState::default()),
        }
    }

    /// Returns `true` once the output has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    /// Returns the buffered log as text.
    pub fn contents(&self) -> String {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&state.buffer).into_owned()
    }
}

impl Default for MemoryLogOutput {
    fn default() -> Self {
        Self::new(LogLevel::Debug)
    }
}

impl LogOutput for MemoryLogOutput {
    fn init(&self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.buffer.clear();
        state.closed = false;
        Ok(())
    }

    fn print_log(&self, level: LogLevel, tag: &str, message: &str) {
        if level < self.min_level {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            return;
        }
        let line = format!(
            "{} {}/{}: {}\n",
            chrono::Local::now().format("%m-%d %H:%M:%S%.3f"),
            level,
            tag,
            message
        );
        state.buffer.extend_from_slice(line.as_bytes());
    }

    fn log(&self) -> Box<dyn InputStreamSource> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Box::new(ByteArraySource::new(state.buffer.clone()))
    }

    fn close_log(&self) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed = true;
    }

    fn clone_output(&self) -> Arc<dyn LogOutput> {
        Arc::new(MemoryLogOutput::new(self.min_level))
    }
}

/// Logging context of one invocation.
///
/// Cheap to clone; all clones write to the same output.
#[derive(Clone)]
pub struct InvocationLog {
    output: Arc<dyn LogOutput>,
    tag: Arc<str>,
}

impl InvocationLog {
    /// Creates a context writing to `output` under `tag`.
    pub fn new(output: Arc<dyn LogOutput>, tag: impl Into<Arc<str>>) -> Self {
        Self {
            output,
            tag: tag.into(),
        }
    }

    /// The underlying output.
    pub fn output(&self) -> &Arc<dyn LogOutput> {
        &self.output
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::debug!(target: "tradeflow::invocation", tag = %self.tag, "{}", message);
        self.output.print_log(LogLevel::Debug, &self.tag, message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!(target: "tradeflow::invocation", tag = %self.tag, "{}", message);
        self.output.print_log(LogLevel::Info, &self.tag, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::warn!(target: "tradeflow::invocation", tag = %self.tag, "{}", message);
        self.output.print_log(LogLevel::Warn, &self.tag, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::error!(target: "tradeflow::invocation", tag = %self.tag, "{}", message);
        self.output.print_log(LogLevel::Error, &self.tag, message);
    }
}

/// Installs the global `tracing` subscriber.
///
/// Honors `RUST_LOG`; otherwise logs at `debug` when `verbose` is set and
/// at `info` otherwise. Calling this twice is an error.
pub fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}
