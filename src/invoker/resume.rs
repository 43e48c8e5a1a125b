//! Resuming an invocation that lost its device.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::build::{BuildInfo, BuildProvider, ExistingBuildProvider};
use crate::config::Configuration;
use crate::error::InvocationError;
use crate::log::{InputStreamSource, InvocationLog};
use crate::result::{
    InvocationListener, LogDataType, LogFile, LogSaver, LogSaverListener, Metrics,
    ResultForwarder, TestIdentifier,
};
use crate::scheduler::Rescheduler;

/// Listener chain of a resumed invocation.
///
/// The original invocation already reported `invocation_started`, so it is
/// swallowed here. `invocation_ended` reports the time spent before the
/// device was lost plus the time of the resumed run.
pub struct ResumeResultForwarder {
    forwarder: ResultForwarder,
    prior_elapsed: Duration,
}

impl ResumeResultForwarder {
    pub fn new(listeners: Vec<Arc<dyn InvocationListener>>, prior_elapsed: Duration) -> Self {
        Self {
            forwarder: ResultForwarder::new(listeners),
            prior_elapsed,
        }
    }

    /// Time already spent by the interrupted invocation.
    pub fn prior_elapsed(&self) -> Duration {
        self.prior_elapsed
    }
}

#[async_trait]
impl InvocationListener for ResumeResultForwarder {
    async fn invocation_started(&self, _build: &BuildInfo) {}

    async fn invocation_failed(&self, error: &InvocationError) {
        self.forwarder.invocation_failed(error).await;
    }

    async fn test_log(&self, name: &str, data_type: LogDataType, source: &dyn InputStreamSource) {
        self.forwarder.test_log(name, data_type, source).await;
    }

    async fn invocation_ended(&self, elapsed: Duration) {
        self.forwarder
            .invocation_ended(self.prior_elapsed + elapsed)
            .await;
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

    fn as_log_saver_listener(&self) -> Option<&dyn LogSaverListener> {
        Some(self)
    }
}

#[async_trait]
impl LogSaverListener for ResumeResultForwarder {
    fn set_log_saver(&self, saver: Arc<dyn LogSaver>) {
        for listener in self.forwarder.listeners() {
            if let Some(saver_listener) = listener.as_log_saver_listener() {
                saver_listener.set_log_saver(saver.clone());
            }
        }
    }

    async fn test_log_saved(
        &self,
        name: &str,
        data_type: LogDataType,
        source: &dyn InputStreamSource,
        log_file: &LogFile,
    ) {
        for listener in self.forwarder.listeners() {
            if let Some(saver_listener) = listener.as_log_saver_listener() {
                saver_listener
                    .test_log_saved(name, data_type, source, log_file)
                    .await;
            }
        }
    }
}

/// Hands the remainder of `config` to `rescheduler` if a test can resume.
///
/// Only the first test that is resumable right now is considered. The
/// resumed configuration runs on a fork of `build` with its own log output
/// and reports to `listeners`, the full chain of the interrupted
/// invocation, through a [`ResumeResultForwarder`] carrying `elapsed`.
/// Returns `true` if the remainder was scheduled; otherwise the fork is
/// released immediately.
pub(super) async fn resume(
    config: &Configuration,
    listeners: &[Arc<dyn InvocationListener>],
    build: &BuildInfo,
    rescheduler: &dyn Rescheduler,
    elapsed: Duration,
    log: &InvocationLog,
) -> bool {
    let Some(test) = config
        .tests
        .iter()
        .find(|t| t.as_resumable().is_some_and(|r| r.is_resumable()))
    else {
        return false;
    };
    log.debug(format!("Resuming invocation at {}", test.name()));

    let resumed_build = build.fork();
    let provider = Arc::new(ExistingBuildProvider::new(
        resumed_build.clone(),
        config.build_provider.clone(),
    ));
    let forwarder: Arc<dyn InvocationListener> = Arc::new(ResumeResultForwarder::new(
        listeners.to_vec(),
        elapsed,
    ));
    let mut resume_config = config.for_child(provider.clone());
    resume_config.listeners = vec![forwarder];

    let scheduled = rescheduler.schedule_config(resume_config);
    if !scheduled {
        log.info(format!(
            "Cannot reschedule resumed config for build {}. Cleaning up build.",
            build.build_id
        ));
        provider.clean_up(&resumed_build).await;
    }
    scheduled
}
