//! Result listeners and the forwarding pipeline.
//!
//! Everything an invocation produces (lifecycle events, test results, logs)
//! is delivered to [`InvocationListener`]s. Listeners never fail: a
//! listener that cannot handle an event logs and moves on, so one broken
//! sink never corrupts the invocation or the other sinks.
//!
//! # Pipeline
//!
//! ```text
//!   TestInvocation
//!        │
//!        ▼
//!  LogSaverResultForwarder ──► LogSaver (started first, ended last,
//!        │                              saves every test_log once)
//!        ▼
//!   listener 1 … listener N  (fixed order, identical event stream)
//! ```
//!
//! Sharded runs add a [`ShardMasterResultForwarder`] that folds the
//! lifecycles of K shards into one logical lifecycle for listeners that
//! are not shard-aware.
//!
//! # Per-listener ordering
//!
//! Every listener sees `invocation_started`, then any number of test and
//! log events, an optional `invocation_failed`, then `invocation_ended`.
//! Nothing follows `invocation_ended`.
//!
//! # Capabilities
//!
//! Optional listener capabilities are exposed through accessors checked
//! when the pipeline is composed:
//!
//! - [`LogSaverListener`] receives the saved [`LogFile`] for every log.
//! - [`SummaryListener`] receives all listeners' summaries right before
//!   `invocation_ended`.
//! - [`clone_for_shard`](InvocationListener::clone_for_shard) marks a
//!   shard-aware listener; each shard gets its own clone.

pub mod collecting;
pub mod console;
pub mod forwarder;
pub mod log_forwarder;
pub mod saver;
pub mod shard;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::build::BuildInfo;
use crate::error::InvocationError;
use crate::log::InputStreamSource;

pub use collecting::CollectingTestListener;
pub use console::ConsoleReporter;
pub use forwarder::{ResultForwarder, report_invocation_ended};
pub use log_forwarder::LogSaverResultForwarder;
pub use saver::{FileSystemLogSaver, LogSaver};
pub use shard::{ShardListener, ShardMasterResultForwarder};

/// Per-test metrics reported with `test_ended` and `test_run_ended`.
pub type Metrics = BTreeMap<String, String>;

/// Kind of data carried by a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogDataType {
    Text,
    Logcat,
    Bugreport,
    Xml,
    Unknown,
}

impl LogDataType {
    /// File extension used when persisting this kind of data.
    pub fn file_ext(&self) -> &'static str {
        match self {
            LogDataType::Text | LogDataType::Logcat | LogDataType::Bugreport => "txt",
            LogDataType::Xml => "xml",
            LogDataType::Unknown => "dat",
        }
    }
}

/// Descriptor of a persisted log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFile {
    /// Where the log was written.
    pub path: PathBuf,

    /// Where the log can be retrieved from.
    pub url: String,
}

impl LogFile {
    pub fn new(path: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            url: url.into(),
        }
    }
}

/// Short summary of an invocation produced by a listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    /// Which listener produced the summary.
    pub source: String,

    /// Summary text or link.
    pub summary: String,

    /// Extra key/value details.
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl TestSummary {
    pub fn new(source: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            summary: summary.into(),
            details: BTreeMap::new(),
        }
    }
}

/// Identifies a single test case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestIdentifier {
    pub class_name: String,
    pub test_name: String,
}

impl TestIdentifier {
    pub fn new(class_name: impl Into<String>, test_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            test_name: test_name.into(),
        }
    }
}

impl fmt::Display for TestIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class_name, self.test_name)
    }
}

/// Receives invocation lifecycle, test and log events.
#[async_trait]
pub trait InvocationListener: Send + Sync {
    /// The invocation started testing `build`.
    async fn invocation_started(&self, build: &BuildInfo);

    /// The invocation failed. May be followed by more events, always by
    /// `invocation_ended`.
    async fn invocation_failed(&self, error: &InvocationError);

    /// A log is available. The source is owned by the caller.
    async fn test_log(&self, name: &str, data_type: LogDataType, source: &dyn InputStreamSource);

    /// The invocation is over. Last event this listener receives.
    async fn invocation_ended(&self, elapsed: Duration);

    /// Summary of what this listener recorded, if it produces one.
    fn summary(&self) -> Option<TestSummary> {
        None
    }

    async fn test_run_started(&self, _run_name: &str, _test_count: usize) {}

    async fn test_started(&self, _test: &TestIdentifier) {}

    async fn test_failed(&self, _test: &TestIdentifier, _trace: &str) {}

    async fn test_ended(&self, _test: &TestIdentifier, _metrics: &Metrics) {}

    async fn test_run_failed(&self, _message: &str) {}

    async fn test_run_ended(&self, _elapsed: Duration, _metrics: &Metrics) {}

    /// Log-saver capability.
    fn as_log_saver_listener(&self) -> Option<&dyn LogSaverListener> {
        None
    }

    /// Summary capability.
    fn as_summary_listener(&self) -> Option<&dyn SummaryListener> {
        None
    }

    /// Shard capability: returns a fresh listener for one shard.
    ///
    /// Listeners returning `None` are not shard-aware and only see the
    /// aggregated lifecycle of a sharded run.
    fn clone_for_shard(&self) -> Option<Arc<dyn InvocationListener>> {
        None
    }
}

/// Listener that wants to know where logs were persisted.
#[async_trait]
pub trait LogSaverListener: Send + Sync {
    /// Hands over the saver used by the pipeline.
    fn set_log_saver(&self, _saver: Arc<dyn LogSaver>) {}

    /// A log passed to `test_log` was saved as `log_file`.
    async fn test_log_saved(
        &self,
        name: &str,
        data_type: LogDataType,
        source: &dyn InputStreamSource,
        log_file: &LogFile,
    );
}

/// Listener that wants every listener's summary before the invocation ends.
pub trait SummaryListener: Send + Sync {
    fn put_summary(&self, summaries: &[TestSummary]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_display() {
        let id = TestIdentifier::new("com.example.FooTest", "testBar");
        assert_eq!(id.to_string(), "com.example.FooTest#testBar");
    }

    #[test]
    fn test_log_data_type_ext() {
        assert_eq!(LogDataType::Logcat.file_ext(), "txt");
        assert_eq!(LogDataType::Xml.file_ext(), "xml");
    }
}
