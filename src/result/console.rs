//! Console output for invocations.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    InvocationListener, LogDataType, Metrics, SummaryListener, TestIdentifier, TestSummary,
};
use crate::build::BuildInfo;
use crate::error::InvocationError;
use crate::log::InputStreamSource;

#[derive(Default)]
struct ConsoleState {
    build: Option<String>,
    passed: usize,
    failed: Vec<String>,
    current_failed: bool,
    errors: Vec<String>,
    summaries: Vec<TestSummary>,
}

/// Prints test progress and a final summary to the terminal.
///
/// Summary-aware: summaries produced by other listeners are printed after
/// the counts.
pub struct ConsoleReporter {
    verbose: bool,
    state: Mutex<ConsoleState>,
}

impl ConsoleReporter {
    /// Creates a reporter. When `verbose`, every test is printed as it ends.
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            state: Mutex::new(ConsoleState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConsoleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl InvocationListener for ConsoleReporter {
    async fn invocation_started(&self, build: &BuildInfo) {
        println!(
            "Invocation started for '{}' on build {}",
            build.test_tag,
            build.description()
        );
        *self.lock() = ConsoleState {
            build: Some(build.description()),
            ..ConsoleState::default()
        };
    }

    async fn invocation_failed(&self, error: &InvocationError) {
        eprintln!("{} {}", console::style("INVOCATION FAILED").red().bold(), error);
        self.lock().errors.push(error.to_string());
    }

    async fn test_log(&self, name: &str, data_type: LogDataType, source: &dyn InputStreamSource) {
        if self.verbose {
            println!(
                "  {} {} ({:?}, {} bytes)",
                console::style("log").dim(),
                name,
                data_type,
                source.size()
            );
        }
    }

    async fn invocation_ended(&self, elapsed: Duration) {
        let state = std::mem::take(&mut *self.lock());

        println!();
        println!("Invocation Results:");
        if let Some(build) = &state.build {
            println!("  Build:    {}", build);
        }
        println!("  Passed:   {}", console::style(state.passed).green());
        println!("  Failed:   {}", console::style(state.failed.len()).red());
        println!("  Duration: {:?}", elapsed);

        if !state.failed.is_empty() {
            println!();
            println!("Failed tests:");
            for test in &state.failed {
                println!("  - {}", test);
            }
        }

        for summary in &state.summaries {
            println!(
                "  {} {}",
                console::style(format!("[{}]", summary.source)).dim(),
                summary.summary
            );
        }

        println!();
        if !state.errors.is_empty() {
            println!("{}", console::style("Invocation failed.").red().bold());
        } else if state.failed.is_empty() {
            println!("{}", console::style("All tests passed!").green().bold());
        } else {
            println!("{}", console::style("Some tests failed.").red().bold());
        }
    }

    async fn test_started(&self, _test: &TestIdentifier) {
        self.lock().current_failed = false;
    }

    async fn test_failed(&self, test: &TestIdentifier, trace: &str) {
        let mut state = self.lock();
        state.current_failed = true;
        state.failed.push(test.to_string());
        if self.verbose {
            println!("{} {}", console::style("FAIL").red(), test);
            for line in trace.lines() {
                println!("    {}", console::style(line).dim());
            }
        }
    }

    async fn test_ended(&self, test: &TestIdentifier, _metrics: &Metrics) {
        let mut state = self.lock();
        if !state.current_failed {
            state.passed += 1;
            if self.verbose {
                println!("{} {}", console::style("PASS").green(), test);
            }
        }
        state.current_failed = false;
    }

    async fn test_run_failed(&self, message: &str) {
        eprintln!("{} {}", console::style("RUN FAILED").red(), message);
    }

    fn as_summary_listener(&self) -> Option<&dyn SummaryListener> {
        Some(self)
    }
}

impl SummaryListener for ConsoleReporter {
    fn put_summary(&self, summaries: &[TestSummary]) {
        self.lock().summaries = summaries.to_vec();
    }
}
