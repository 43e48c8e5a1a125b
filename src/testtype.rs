//! Tests the engine can run, and their optional capabilities.
//!
//! A [`RemoteTest`] reports its results to the listener it is given. On
//! top of that, a test may opt into capabilities the engine checks when
//! composing the invocation:
//!
//! | Capability | Accessor | Effect |
//! |------------|----------|--------|
//! | build receiver | [`receives_build`](RemoteTest::receives_build) | build available in [`RunContext::build`] |
//! | device test | [`requires_device`](RemoteTest::requires_device) | device available in [`RunContext::device`] |
//! | shardable | [`as_shardable`](RemoteTest::as_shardable) | may be split into independent shards |
//! | resumable | [`as_resumable`](RemoteTest::as_resumable) | may continue on another device after device loss |
//! | retriable | [`as_retriable`](RemoteTest::as_retriable) | failures may trigger a command retry |

use std::sync::Arc;

use async_trait::async_trait;

use crate::build::BuildInfo;
use crate::device::Device;
use crate::error::InvocationResult;
use crate::log::InvocationLog;
use crate::result::InvocationListener;
use crate::run_util::RunUtil;

/// Everything a test may use while running.
pub struct RunContext<'a> {
    device: Option<&'a dyn Device>,
    build: Option<&'a BuildInfo>,
    log: &'a InvocationLog,
    run_util: &'a RunUtil,
}

impl<'a> RunContext<'a> {
    /// Creates a context with no device or build attached.
    pub fn new(log: &'a InvocationLog, run_util: &'a RunUtil) -> Self {
        Self {
            device: None,
            build: None,
            log,
            run_util,
        }
    }

    /// Attaches the device.
    pub fn with_device(mut self, device: &'a dyn Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Attaches the build.
    pub fn with_build(mut self, build: &'a BuildInfo) -> Self {
        self.build = Some(build);
        self
    }

    /// The device, for tests declaring [`RemoteTest::requires_device`].
    pub fn device(&self) -> Option<&'a dyn Device> {
        self.device
    }

    /// The build, for tests declaring [`RemoteTest::receives_build`].
    pub fn build(&self) -> Option<&'a BuildInfo> {
        self.build
    }

    /// The invocation's logging context.
    pub fn log(&self) -> &'a InvocationLog {
        self.log
    }

    /// The invocation's interrupt state.
    pub fn run_util(&self) -> &'a RunUtil {
        self.run_util
    }
}

/// A unit of test work executed by an invocation.
#[async_trait]
pub trait RemoteTest: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Runs the test, reporting to `listener`.
    async fn run(
        &self,
        ctx: &RunContext<'_>,
        listener: &dyn InvocationListener,
    ) -> InvocationResult<()>;

    /// Whether the test wants the build under test.
    fn receives_build(&self) -> bool {
        false
    }

    /// Whether the test wants direct access to the device.
    fn requires_device(&self) -> bool {
        false
    }

    /// Sharding capability.
    fn as_shardable(&self) -> Option<&dyn ShardableTest> {
        None
    }

    /// Resume capability.
    fn as_resumable(&self) -> Option<&dyn ResumableTest> {
        None
    }

    /// Retry capability.
    fn as_retriable(&self) -> Option<&dyn RetriableTest> {
        None
    }
}

/// A test that can be split into independently runnable pieces.
pub trait ShardableTest: Send + Sync {
    /// Splits the test. `None` means the test cannot be split right now
    /// and should run whole.
    fn split(&self) -> Option<Vec<Arc<dyn RemoteTest>>>;
}

/// A test that can continue where it left off after losing its device.
pub trait ResumableTest: Send + Sync {
    /// Whether there is remaining work worth resuming.
    fn is_resumable(&self) -> bool;
}

/// A test whose failed runs may be retried as a whole command.
pub trait RetriableTest: Send + Sync {
    /// Whether a retry is currently warranted.
    fn is_retriable(&self) -> bool;
}
