//! Forwarder that persists every log exactly once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::error;

use super::forwarder::{ResultForwarder, report_invocation_ended};
use super::{InvocationListener, LogDataType, LogSaver, Metrics, TestIdentifier};
use crate::build::BuildInfo;
use crate::error::InvocationError;
use crate::log::InputStreamSource;

/// Head of an invocation's listener chain.
///
/// Brackets the downstream listeners with the [`LogSaver`]: the saver
/// hears `invocation_started` before any listener and `invocation_ended`
/// after all of them. Each `test_log` is forwarded as-is, then saved once,
/// then the resulting [`LogFile`](super::LogFile) is announced to
/// log-saver-aware listeners.
///
/// The forwarded source stays owned by the caller, who must still release
/// it after this call returns.
pub struct LogSaverResultForwarder {
    saver: Arc<dyn LogSaver>,
    forwarder: ResultForwarder,
}

impl LogSaverResultForwarder {
    /// Creates the forwarder and hands `saver` to log-saver-aware listeners.
    pub fn new(saver: Arc<dyn LogSaver>, listeners: Vec<Arc<dyn InvocationListener>>) -> Self {
        for listener in &listeners {
            if let Some(saver_listener) = listener.as_log_saver_listener() {
                saver_listener.set_log_saver(saver.clone());
            }
        }
        Self {
            saver,
            forwarder: ResultForwarder::new(listeners),
        }
    }

    /// The downstream listeners.
    pub fn listeners(&self) -> &[Arc<dyn InvocationListener>] {
        self.forwarder.listeners()
    }

    /// Ends the saver's lifecycle without ending the listeners', for an
    /// invocation whose listeners are handed over to a resumed run.
    pub async fn end_log_saver(&self, elapsed: Duration) {
        self.saver.invocation_ended(elapsed).await;
    }
}

#[async_trait]
impl InvocationListener for LogSaverResultForwarder {
    async fn invocation_started(&self, build: &BuildInfo) {
        self.saver.invocation_started(build).await;
        self.forwarder.invocation_started(build).await;
    }

    async fn invocation_failed(&self, error: &InvocationError) {
        self.forwarder.invocation_failed(error).await;
    }

    async fn test_log(&self, name: &str, data_type: LogDataType, source: &dyn InputStreamSource) {
        self.forwarder.test_log(name, data_type, source).await;
        match self.saver.save_log_data(name, data_type, source).await {
            Ok(log_file) => {
                for listener in self.listeners() {
                    if let Some(saver_listener) = listener.as_log_saver_listener() {
                        saver_listener
                            .test_log_saved(name, data_type, source, &log_file)
                            .await;
                    }
                }
            }
            Err(e) => {
                error!("Failed to save log data {}: {}", name, e);
            }
        }
    }

    async fn invocation_ended(&self, elapsed: Duration) {
        report_invocation_ended(self.listeners(), elapsed).await;
        self.saver.invocation_ended(elapsed).await;
    }

    async fn test_run_started(&self, run_name: &str, test_count: usize) {
        self.forwarder.test_run_started(run_name, test_count).await;
    }

    async fn test_started(&self, test: &TestIdentifier) {
        self.forwarder.test_started(test).await;
    }

    async fn test_failed(&self, test: &TestIdentifier, trace: &str) {
        self.forwarder.test_failed(test, trace).await;
    }

    async fn test_ended(&self, test: &TestIdentifier, metrics: &Metrics) {
        self.forwarder.test_ended(test, metrics).await;
    }

    async fn test_run_failed(&self, message: &str) {
        self.forwarder.test_run_failed(message).await;
    }

    async fn test_run_ended(&self, elapsed: Duration, metrics: &Metrics) {
        self.forwarder.test_run_ended(elapsed, metrics).await;
    }
}
