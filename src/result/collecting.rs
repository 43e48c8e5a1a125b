//! Listener that keeps everything it is told.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{InvocationListener, LogDataType, Metrics, TestIdentifier};
use crate::build::BuildInfo;
use crate::error::InvocationError;
use crate::log::InputStreamSource;

/// Final status of one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// Started but never ended.
    Incomplete,
    Passed,
    Failure,
}

/// Results of one test run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TestRunResult {
    /// Run name.
    pub name: String,

    /// Number of tests the run announced.
    pub expected_tests: usize,

    /// Tests that passed.
    pub passed: usize,

    /// Tests that failed.
    pub failed: usize,

    /// Run-level failure, if the run itself failed.
    pub run_failure: Option<String>,

    /// Duration reported when the run ended.
    pub elapsed: Duration,

    /// Status of every test seen.
    pub tests: BTreeMap<String, TestStatus>,

    /// Whether the run reported its end.
    pub complete: bool,
}

impl TestRunResult {
    fn recount(&mut self) {
        self.passed = self
            .tests
            .values()
            .filter(|s| **s == TestStatus::Passed)
            .count();
        self.failed = self
            .tests
            .values()
            .filter(|s| **s == TestStatus::Failure)
            .count();
    }
}

#[derive(Default)]
struct CollectingState {
    build: Option<BuildInfo>,
    runs: Vec<TestRunResult>,
    failures: Vec<String>,
    logs: Vec<(String, LogDataType)>,
    started: usize,
    ended: usize,
    elapsed: Option<Duration>,
}

impl CollectingState {
    fn current_run(&mut self) -> &mut TestRunResult {
        let needs_run = self.runs.last().is_none_or(|r| r.complete);
        if needs_run {
            self.runs.push(TestRunResult::default());
        }
        let last = self.runs.len() - 1;
        &mut self.runs[last]
    }
}

/// [`InvocationListener`] that records every event for later inspection.
#[derive(Default)]
pub struct CollectingTestListener {
    state: Mutex<CollectingState>,
}

impl CollectingTestListener {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut CollectingState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// The build reported by the most recent `invocation_started`.
    pub fn build(&self) -> Option<BuildInfo> {
        self.with_state(|s| s.build.clone())
    }

    /// How many times `invocation_started` was received.
    pub fn started_count(&self) -> usize {
        self.with_state(|s| s.started)
    }

    /// How many times `invocation_ended` was received.
    pub fn ended_count(&self) -> usize {
        self.with_state(|s| s.ended)
    }

    /// Elapsed time of the most recent `invocation_ended`.
    pub fn elapsed(&self) -> Option<Duration> {
        self.with_state(|s| s.elapsed)
    }

    /// Messages of every `invocation_failed`.
    pub fn failures(&self) -> Vec<String> {
        self.with_state(|s| s.failures.clone())
    }

    /// Names and types of every log received.
    pub fn logs(&self) -> Vec<(String, LogDataType)> {
        self.with_state(|s| s.logs.clone())
    }

    /// All test runs, in the order they started.
    pub fn run_results(&self) -> Vec<TestRunResult> {
        self.with_state(|s| s.runs.clone())
    }

    /// Total number of test cases seen.
    pub fn num_total_tests(&self) -> usize {
        self.with_state(|s| s.runs.iter().map(|r| r.tests.len()).sum())
    }

    /// Returns `true` if any test case failed.
    pub fn has_failed_tests(&self) -> bool {
        self.with_state(|s| s.runs.iter().any(|r| r.failed > 0))
    }
}

#[async_trait]
impl InvocationListener for CollectingTestListener {
    async fn invocation_started(&self, build: &BuildInfo) {
        self.with_state(|s| {
            s.build = Some(build.clone());
            s.started += 1;
        });
    }

    async fn invocation_failed(&self, error: &InvocationError) {
        self.with_state(|s| s.failures.push(error.to_string()));
    }

    async fn test_log(&self, name: &str, data_type: LogDataType, _source: &dyn InputStreamSource) {
        self.with_state(|s| s.logs.push((name.to_string(), data_type)));
    }

    async fn invocation_ended(&self, elapsed: Duration) {
        self.with_state(|s| {
            s.ended += 1;
            s.elapsed = Some(elapsed);
        });
    }

    async fn test_run_started(&self, run_name: &str, test_count: usize) {
        self.with_state(|s| {
            s.runs.push(TestRunResult {
                name: run_name.to_string(),
                expected_tests: test_count,
                ..TestRunResult::default()
            });
        });
    }

    async fn test_started(&self, test: &TestIdentifier) {
        self.with_state(|s| {
            s.current_run()
                .tests
                .insert(test.to_string(), TestStatus::Incomplete);
        });
    }

    async fn test_failed(&self, test: &TestIdentifier, _trace: &str) {
        self.with_state(|s| {
            let run = s.current_run();
            run.tests.insert(test.to_string(), TestStatus::Failure);
            run.recount();
        });
    }

    async fn test_ended(&self, test: &TestIdentifier, _metrics: &Metrics) {
        self.with_state(|s| {
            let run = s.current_run();
            let status = run
                .tests
                .entry(test.to_string())
                .or_insert(TestStatus::Incomplete);
            if *status == TestStatus::Incomplete {
                *status = TestStatus::Passed;
            }
            run.recount();
        });
    }

    async fn test_run_failed(&self, message: &str) {
        self.with_state(|s| s.current_run().run_failure = Some(message.to_string()));
    }

    async fn test_run_ended(&self, elapsed: Duration, _metrics: &Metrics) {
        self.with_state(|s| {
            let run = s.current_run();
            run.elapsed = elapsed;
            run.complete = true;
        });
    }
}
