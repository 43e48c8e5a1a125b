//! Fan-out of events to an ordered list of listeners.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{InvocationListener, LogDataType, Metrics, TestIdentifier, TestSummary};
use crate::build::BuildInfo;
use crate::error::InvocationError;
use crate::log::InputStreamSource;

/// Delivers `invocation_ended` to `listeners`, handing summaries over first.
///
/// Summaries are collected from every listener, then every summary-aware
/// listener receives the full list, then each listener gets
/// `invocation_ended` in order.
pub async fn report_invocation_ended(listeners: &[Arc<dyn InvocationListener>], elapsed: Duration) {
    let summaries: Vec<TestSummary> = listeners.iter().filter_map(|l| l.summary()).collect();
    for listener in listeners {
        if let Some(summary_listener) = listener.as_summary_listener() {
            summary_listener.put_summary(&summaries);
        }
    }
    for listener in listeners {
        listener.invocation_ended(elapsed).await;
    }
}

/// Replays every event on each listener, in list order.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tradeflow::result::{CollectingTestListener, InvocationListener, ResultForwarder};
///
/// let collector = Arc::new(CollectingTestListener::new());
/// let forwarder = ResultForwarder::new(vec![collector.clone() as Arc<dyn InvocationListener>]);
/// assert_eq!(forwarder.listeners().len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct ResultForwarder {
    listeners: Vec<Arc<dyn InvocationListener>>,
}

impl ResultForwarder {
    pub fn new(listeners: Vec<Arc<dyn InvocationListener>>) -> Self {
        Self { listeners }
    }

    /// The downstream listeners.
    pub fn listeners(&self) -> &[Arc<dyn InvocationListener>] {
        &self.listeners
    }
}

#[async_trait]
impl InvocationListener for ResultForwarder {
    async fn invocation_started(&self, build: &BuildInfo) {
        for listener in &self.listeners {
            listener.invocation_started(build).await;
        }
    }

    async fn invocation_failed(&self, error: &InvocationError) {
        for listener in &self.listeners {
            listener.invocation_failed(error).await;
        }
    }

    async fn test_log(&self, name: &str, data_type: LogDataType, source: &dyn InputStreamSource) {
        for listener in &self.listeners {
            listener.test_log(name, data_type, source).await;
        }
    }

    async fn invocation_ended(&self, elapsed: Duration) {
        report_invocation_ended(&self.listeners, elapsed).await;
    }

    async fn test_run_started(&self, run_name: &str, test_count: usize) {
        for listener in &self.listeners {
            listener.test_run_started(run_name, test_count).await;
        }
    }

    async fn test_started(&self, test: &TestIdentifier) {
        for listener in &self.listeners {
            listener.test_started(test).await;
        }
    }

    async fn test_failed(&self, test: &TestIdentifier, trace: &str) {
        for listener in &self.listeners {
            listener.test_failed(test, trace).await;
        }
    }

    async fn test_ended(&self, test: &TestIdentifier, metrics: &Metrics) {
        for listener in &self.listeners {
            listener.test_ended(test, metrics).await;
        }
    }

    async fn test_run_failed(&self, message: &str) {
        for listener in &self.listeners {
            listener.test_run_failed(message).await;
        }
    }

    async fn test_run_ended(&self, elapsed: Duration, metrics: &Metrics) {
        for listener in &self.listeners {
            listener.test_run_ended(elapsed, metrics).await;
        }
    }
}
