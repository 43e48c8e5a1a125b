//! Aggregation of sharded invocations into one logical lifecycle.
//!
//! When an invocation is split into K shards, listeners that are not
//! shard-aware must still see a single lifecycle. Each shard reports into
//! the shared [`ShardMasterResultForwarder`] through its own
//! [`ShardListener`].
//!
//! # Concurrency
//!
//! Shards run on separate tasks, so the master forwarder is called
//! concurrently. Its discipline is:
//!
//! - the "started" guard is an `AtomicBool` flipped with compare-exchange,
//!   so exactly one caller forwards `invocation_started`;
//! - the shard countdown and the elapsed-time sum live together behind a
//!   `std::sync::Mutex`, which is only held to update them and never across
//!   an `.await`; the caller whose update completes the countdown is the
//!   only one that forwards `invocation_ended`;
//! - whole test runs are replayed under an async mutex so runs coming from
//!   different shards never interleave downstream.
//!
//! # Liveness
//!
//! The release of `invocation_ended` is a countdown, not a timed barrier.
//! A shard that never reports `invocation_ended` holds the logical
//! lifecycle open forever; [`remaining_shards`](ShardMasterResultForwarder::remaining_shards)
//! exposes the countdown so an outer watchdog can detect it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::forwarder::ResultForwarder;
use super::{
    InvocationListener, LogDataType, LogFile, LogSaverListener, Metrics, TestIdentifier,
};
use crate::build::BuildInfo;
use crate::error::InvocationError;
use crate::log::InputStreamSource;

/// One buffered test-run event.
#[derive(Debug, Clone)]
enum RunEvent {
    RunStarted { name: String, test_count: usize },
    Started(TestIdentifier),
    Failed(TestIdentifier, String),
    Ended(TestIdentifier, Metrics),
    RunFailed(String),
    RunEnded(Duration, Metrics),
}

#[derive(Debug, Default)]
struct ShardProgress {
    ended: usize,
    elapsed: Duration,
}

/// Folds the lifecycles of `expected_shards` shards into one.
///
/// - `invocation_started` is forwarded at most once, first caller wins.
/// - `invocation_ended` calls are summed; the sum is forwarded when the
///   last expected shard ends. Further calls are ignored.
/// - `invocation_failed` is forwarded immediately on every call.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tradeflow::build::BuildInfo;
/// use tradeflow::result::{CollectingTestListener, InvocationListener, ShardMasterResultForwarder};
///
/// # tokio_test::block_on(async {
/// let collector = Arc::new(CollectingTestListener::new());
/// let master = ShardMasterResultForwarder::new(vec![collector.clone() as Arc<dyn InvocationListener>], 2);
///
/// master.invocation_started(&BuildInfo::new("B1", "tag")).await;
/// master.invocation_ended(Duration::from_secs(3)).await;
/// assert_eq!(collector.elapsed(), None);
///
/// master.invocation_ended(Duration::from_secs(4)).await;
/// assert_eq!(collector.elapsed(), Some(Duration::from_secs(7)));
/// # });
/// ```
pub struct ShardMasterResultForwarder {
    forwarder: ResultForwarder,
    expected_shards: usize,
    started: AtomicBool,
    progress: Mutex<ShardProgress>,
    replay_lock: tokio::sync::Mutex<()>,
}

impl ShardMasterResultForwarder {
    /// Creates a master forwarding to `listeners` once `expected_shards`
    /// shards have ended. At least one shard is always expected.
    pub fn new(listeners: Vec<Arc<dyn InvocationListener>>, expected_shards: usize) -> Self {
        Self {
            forwarder: ResultForwarder::new(listeners),
            expected_shards: expected_shards.max(1),
            started: AtomicBool::new(false),
            progress: Mutex::new(ShardProgress::default()),
            replay_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Number of shards this master waits for.
    pub fn expected_shards(&self) -> usize {
        self.expected_shards
    }

    /// Shards that have not reported `invocation_ended` yet.
    pub fn remaining_shards(&self) -> usize {
        let progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        self.expected_shards - progress.ended
    }

    /// The downstream listeners.
    pub fn listeners(&self) -> &[Arc<dyn InvocationListener>] {
        self.forwarder.listeners()
    }

    /// Records one shard's end. Returns the total elapsed time if this
    /// call completed the countdown.
    fn record_shard_ended(&self, elapsed: Duration) -> Option<Duration> {
        let mut progress = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        if progress.ended >= self.expected_shards {
            return None;
        }
        progress.ended += 1;
        progress.elapsed += elapsed;
        debug!(
            "Shard ended ({}/{}), elapsed {:?}",
            progress.ended, self.expected_shards, elapsed
        );
        (progress.ended == self.expected_shards).then_some(progress.elapsed)
    }

    /// Replays one shard's complete test run without interleaving.
    async fn replay_run(&self, events: Vec<RunEvent>) {
        let _guard = self.replay_lock.lock().await;
        for event in events {
            match event {
                RunEvent::RunStarted { name, test_count } => {
                    self.forwarder.test_run_started(&name, test_count).await
                }
                RunEvent::Started(test) => self.forwarder.test_started(&test).await,
                RunEvent::Failed(test, trace) => self.forwarder.test_failed(&test, &trace).await,
                RunEvent::Ended(test, metrics) => self.forwarder.test_ended(&test, &metrics).await,
                RunEvent::RunFailed(message) => self.forwarder.test_run_failed(&message).await,
                RunEvent::RunEnded(elapsed, metrics) => {
                    self.forwarder.test_run_ended(elapsed, &metrics).await
                }
            }
        }
    }
}

#[async_trait]
impl InvocationListener for ShardMasterResultForwarder {
    async fn invocation_started(&self, build: &BuildInfo) {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.forwarder.invocation_started(build).await;
        }
    }

    async fn invocation_failed(&self, error: &InvocationError) {
        self.forwarder.invocation_failed(error).await;
    }

    async fn test_log(&self, name: &str, data_type: LogDataType, source: &dyn InputStreamSource) {
        self.forwarder.test_log(name, data_type, source).await;
    }

    async fn invocation_ended(&self, elapsed: Duration) {
        if let Some(total) = self.record_shard_ended(elapsed) {
            self.forwarder.invocation_ended(total).await;
        }
    }

    async fn test_run_started(&self, run_name: &str, test_count: usize) {
        self.replay_run(vec![RunEvent::RunStarted {
            name: run_name.to_string(),
            test_count,
        }])
        .await;
    }

    async fn test_started(&self, test: &TestIdentifier) {
        self.replay_run(vec![RunEvent::Started(test.clone())]).await;
    }

    async fn test_failed(&self, test: &TestIdentifier, trace: &str) {
        self.replay_run(vec![RunEvent::Failed(test.clone(), trace.to_string())])
            .await;
    }

    async fn test_ended(&self, test: &TestIdentifier, metrics: &Metrics) {
        self.replay_run(vec![RunEvent::Ended(test.clone(), metrics.clone())])
            .await;
    }

    async fn test_run_failed(&self, message: &str) {
        self.replay_run(vec![RunEvent::RunFailed(message.to_string())])
            .await;
    }

    async fn test_run_ended(&self, elapsed: Duration, metrics: &Metrics) {
        self.replay_run(vec![RunEvent::RunEnded(elapsed, metrics.clone())])
            .await;
    }

    fn as_log_saver_listener(&self) -> Option<&dyn LogSaverListener> {
        Some(self)
    }
}

#[async_trait]
impl LogSaverListener for ShardMasterResultForwarder {
    async fn test_log_saved(
        &self,
        name: &str,
        data_type: LogDataType,
        source: &dyn InputStreamSource,
        log_file: &LogFile,
    ) {
        for listener in self.listeners() {
            if let Some(saver_listener) = listener.as_log_saver_listener() {
                saver_listener
                    .test_log_saved(name, data_type, source, log_file)
                    .await;
            }
        }
    }
}

/// A shard's link to the shared master forwarder.
///
/// Forwards lifecycle and log events straight to the master. Test-run
/// events are buffered and handed over as one complete run when the run
/// ends, so concurrent shards never interleave runs downstream.
pub struct ShardListener {
    master: Arc<ShardMasterResultForwarder>,
    pending: Mutex<Vec<RunEvent>>,
}

impl ShardListener {
    pub fn new(master: Arc<ShardMasterResultForwarder>) -> Self {
        Self {
            master,
            pending: Mutex::new(Vec::new()),
        }
    }

    fn buffer(&self, event: RunEvent) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    async fn flush(&self) {
        let events = std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));
        if !events.is_empty() {
            self.master.replay_run(events).await;
        }
    }
}

#[async_trait]
impl InvocationListener for ShardListener {
    async fn invocation_started(&self, build: &BuildInfo) {
        self.master.invocation_started(build).await;
    }

    async fn invocation_failed(&self, error: &InvocationError) {
        self.master.invocation_failed(error).await;
    }

    async fn test_log(&self, name: &str, data_type: LogDataType, source: &dyn InputStreamSource) {
        self.master.test_log(name, data_type, source).await;
    }

    async fn invocation_ended(&self, elapsed: Duration) {
        let unfinished = !self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty();
        if unfinished {
            warn!("Shard ended with an unfinished test run, forwarding partial run");
        }
        self.flush().await;
        self.master.invocation_ended(elapsed).await;
    }

    async fn test_run_started(&self, run_name: &str, test_count: usize) {
        self.buffer(RunEvent::RunStarted {
            name: run_name.to_string(),
            test_count,
        });
    }

    async fn test_started(&self, test: &TestIdentifier) {
        self.buffer(RunEvent::Started(test.clone()));
    }

    async fn test_failed(&self, test: &TestIdentifier, trace: &str) {
        self.buffer(RunEvent::Failed(test.clone(), trace.to_string()));
    }

    async fn test_ended(&self, test: &TestIdentifier, metrics: &Metrics) {
        self.buffer(RunEvent::Ended(test.clone(), metrics.clone()));
    }

    async fn test_run_failed(&self, message: &str) {
        self.buffer(RunEvent::RunFailed(message.to_string()));
    }

    async fn test_run_ended(&self, elapsed: Duration, metrics: &Metrics) {
        self.buffer(RunEvent::RunEnded(elapsed, metrics.clone()));
        self.flush().await;
    }

    fn as_log_saver_listener(&self) -> Option<&dyn LogSaverListener> {
        Some(self)
    }
}

#[async_trait]
impl LogSaverListener for ShardListener {
    async fn test_log_saved(
        &self,
        name: &str,
        data_type: LogDataType,
        source: &dyn InputStreamSource,
        log_file: &LogFile,
    ) {
        self.master
            .test_log_saved(name, data_type, source, log_file)
            .await;
    }
}
