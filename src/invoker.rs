//! The invocation engine.
//!
//! A [`TestInvocation`] drives one configuration against one device:
//!
//! ```text
//!  fetching build ─► sharding ─┬─► (sharded) shards rescheduled, done
//!                              │
//!                              └─► setup ─► run ─► teardown ─► cleanup ─► done
//!                                    └──── failure classification ────┘
//! ```
//!
//! # Failure handling
//!
//! Every failure is reported to the listeners with `invocation_failed`
//! before anything else happens. What follows depends on the error:
//!
//! | Error | Build not tested | Reschedule | Returned as `Err` |
//! |-------|------------------|------------|-------------------|
//! | build retrieval | - | no | no |
//! | build | no | no | no |
//! | target setup | yes | retriable tests | no |
//! | device loss | yes, unless resumed | resume first | always |
//! | run interrupted | no | no | no |
//! | assertion / runtime | yes | retriable tests | yes |
//!
//! Teardown always runs, even when setup or the tests failed, and the build
//! is always released through its provider.

mod resume;
mod shard;

pub use resume::ResumeResultForwarder;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::build::BuildInfo;
use crate::config::Configuration;
use crate::device::{BATTERY_QUERY_TIMEOUT, Device, DeviceState};
use crate::error::{InvocationError, InvocationResult};
use crate::log::{InputStreamSource, InvocationLog, LogOutput};
use crate::result::{InvocationListener, LogDataType, LogSaverResultForwarder};
use crate::run_util::RunUtil;
use crate::scheduler::Rescheduler;
use crate::testtype::RunContext;

/// Name of the device log reported at the end of an invocation.
pub const DEVICE_LOG_NAME: &str = "device_logcat";
/// Name of the emulator output reported for emulators.
pub const EMULATOR_LOG_NAME: &str = "emulator_log";
/// Name of the host log reported at the end of an invocation.
pub const HOST_LOG_NAME: &str = "host_log";

/// Name of the bugreport taken when the build is at fault.
pub const BUILD_ERROR_BUGREPORT_NAME: &str = "build_error_bugreport";
/// Name of the bugreport taken when a target preparer failed.
pub const TARGET_SETUP_ERROR_BUGREPORT_NAME: &str = "target_setup_error_bugreport";
/// Name of the bugreport taken when the device stopped responding but is
/// still online.
pub const DEVICE_UNRESPONSIVE_BUGREPORT_NAME: &str = "device_unresponsive_bugreport";
/// Name of the bugreport taken at the end of every invocation when
/// configured.
pub const INVOCATION_ENDED_BUGREPORT_NAME: &str = "invocation_ended_bugreport";

/// Runs configurations against devices.
///
/// One instance serves one invocation at a time. The status string and the
/// interrupt state are exposed for whoever supervises the invocation.
///
/// # Example
///
/// ```ignore
/// let invocation = TestInvocation::new();
/// invocation.invoke(device.as_ref(), config, &scheduler, &[]).await?;
/// println!("{}", invocation.status());
/// ```
pub struct TestInvocation {
    status: Mutex<String>,
    run_util: Arc<RunUtil>,
}

impl Default for TestInvocation {
    fn default() -> Self {
        Self::new()
    }
}

impl TestInvocation {
    pub fn new() -> Self {
        Self::with_run_util(Arc::new(RunUtil::new()))
    }

    /// Creates an invocation observing the given interrupt state.
    pub fn with_run_util(run_util: Arc<RunUtil>) -> Self {
        Self {
            status: Mutex::new("(not invoked)".to_string()),
            run_util,
        }
    }

    /// Human-readable description of what the invocation is doing.
    pub fn status(&self) -> String {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Interrupt state of this invocation. Call
    /// [`RunUtil::interrupt`] on it to stop a running invocation.
    pub fn run_util(&self) -> &Arc<RunUtil> {
        &self.run_util
    }

    fn set_status(&self, status: impl Into<String>) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status.into();
    }

    /// Runs `config` on `device`.
    ///
    /// Results go to the configuration's listeners followed by
    /// `extra_listeners`. Shards and resumed remainders are handed to
    /// `rescheduler`.
    ///
    /// # Errors
    ///
    /// Device loss is always returned, after the listeners were notified.
    /// Assertion and runtime errors are returned as well, and so is a
    /// teardown failure when nothing was returned before it. Every other
    /// failure is absorbed once reported: `Ok(())` does not mean the tests
    /// passed.
    pub async fn invoke(
        &self,
        device: &dyn Device,
        config: Configuration,
        rescheduler: &dyn Rescheduler,
        extra_listeners: &[Arc<dyn InvocationListener>],
    ) -> InvocationResult<()> {
        let mut listeners = config.listeners.clone();
        listeners.extend(extra_listeners.iter().cloned());
        let listener = LogSaverResultForwarder::new(config.log_saver.clone(), listeners);
        let log = InvocationLog::new(config.log_output.clone(), device.serial_number());

        self.set_status("fetching build");
        if let Err(e) = config.log_output.init() {
            warn!(
                "Invocation on {} skipped, failed to initialize log output: {}",
                device.serial_number(),
                e
            );
            device.stop_logcat().await;
            config.log_output.close_log();
            return Ok(());
        }
        device.clear_last_connected_wifi_network().await;
        device.set_options(&config.device_options).await;
        if config.device_options.logcat_capture {
            device.start_logcat().await;
        }
        if let Some(command_line) = &config.command_line {
            log.info(format!("Invocation was started with cmd: {}", command_line));
        }

        match config.build_provider.get_build(device).await {
            Ok(Some(build)) => {
                self.set_status("sharding");
                if shard::shard_config(&config, &build, rescheduler, &log).await {
                    log.info(format!(
                        "Invocation for {} has been sharded, rescheduling",
                        device.serial_number()
                    ));
                } else {
                    device.set_recovery(config.device_recovery.clone()).await;
                    return self
                        .perform_invocation(&config, device, build, rescheduler, &listener, &log)
                        .await;
                }
            }
            Ok(None) => {
                self.set_status("(no build to test)");
                log.debug("No build to test");
                self.reschedule_test(&config, rescheduler);
            }
            Err(e) => {
                log.error(e.to_string());
                let build = e.build.clone().unwrap_or_else(BuildInfo::unknown);
                // Report a degenerate lifecycle so the failure reaches the listeners.
                self.start_invocation(device, &build, &listener, &log).await;
                listener
                    .invocation_failed(&InvocationError::BuildRetrieval(e))
                    .await;
                report_logs(device, &listener, config.log_output.as_ref()).await;
                listener.invocation_ended(Duration::ZERO).await;
                return Ok(());
            }
        }

        device.stop_logcat().await;
        config.log_output.close_log();
        Ok(())
    }

    async fn perform_invocation(
        &self,
        config: &Configuration,
        device: &dyn Device,
        mut build: BuildInfo,
        rescheduler: &dyn Rescheduler,
        listener: &LogSaverResultForwarder,
        log: &InvocationLog,
    ) -> InvocationResult<()> {
        let start = Instant::now();
        let mut resumed = false;
        let mut bugreport_name: Option<&str> = None;
        // Failure observed by setup or run, handed to cleaners.
        let mut observed: Option<InvocationError> = None;
        let mut rethrown: Option<InvocationError> = None;

        build.device_serial = Some(device.serial_number().to_string());
        self.start_invocation(device, &build, listener, log).await;

        log_battery_level(device, log, "initial").await;
        let outcome = self
            .prepare_and_run(config, device, &build, listener, log)
            .await;

        if let Err(e) = outcome {
            match &e {
                InvocationError::Build(_) => {
                    log.warn(format!(
                        "Build {} failed on device {}. Reason: {}",
                        build.build_id,
                        device.serial_number(),
                        e
                    ));
                    bugreport_name = Some(BUILD_ERROR_BUGREPORT_NAME);
                    self.report_failure(&e, listener, config, &build, rescheduler)
                        .await;
                }
                InvocationError::TargetSetup(_) => {
                    log.error(format!("Caught exception while running invocation: {}", e));
                    bugreport_name = Some(TARGET_SETUP_ERROR_BUGREPORT_NAME);
                    self.report_failure(&e, listener, config, &build, rescheduler)
                        .await;
                }
                InvocationError::DeviceNotAvailable { .. }
                | InvocationError::DeviceUnresponsive { .. } => {
                    log.warn(format!(
                        "Invocation did not complete due to device {} becoming not available. Reason: {}",
                        device.serial_number(),
                        e
                    ));
                    if matches!(e, InvocationError::DeviceUnresponsive { .. })
                        && device.state().await == DeviceState::Online
                    {
                        bugreport_name = Some(DEVICE_UNRESPONSIVE_BUGREPORT_NAME);
                    }
                    resumed = resume::resume(
                        config,
                        listener.listeners(),
                        &build,
                        rescheduler,
                        start.elapsed(),
                        log,
                    )
                    .await;
                    if resumed {
                        log.info("Rescheduled failed invocation for resume");
                    } else {
                        self.report_failure(&e, listener, config, &build, rescheduler)
                            .await;
                    }
                }
                InvocationError::RunInterrupted(_) => {
                    log.warn("Invocation interrupted");
                    self.report_failure(&e, listener, config, &build, rescheduler)
                        .await;
                }
                _ => {
                    log.error(format!(
                        "Unexpected exception when running invocation: {}",
                        e
                    ));
                    self.report_failure(&e, listener, config, &build, rescheduler)
                        .await;
                }
            }
            if !matches!(e, InvocationError::RunInterrupted(_)) {
                observed = Some(e.clone());
            }
            if e.is_rethrown() {
                rethrown = Some(e);
            }
        }

        self.run_util.allow_interrupt(false);
        if config.command_options.bugreport_on_invocation_ended {
            if bugreport_name.is_some() {
                log.info("Bugreport to be taken for failure instead of invocation ended.");
            } else {
                bugreport_name = Some(INVOCATION_ENDED_BUGREPORT_NAME);
            }
        }
        if let Some(name) = bugreport_name {
            take_bugreport(device, listener, name).await;
        }

        self.set_status("tearing down");
        let mut teardown_error = None;
        if let Err(e) = do_teardown(config, device, &build, observed.as_ref(), log).await {
            log.error(format!("Exception when tearing down invocation: {}", e));
            if observed.is_none() {
                self.report_failure(&e, listener, config, &build, rescheduler)
                    .await;
            }
            teardown_error = Some(e);
        }

        self.set_status("done running tests");
        do_clean_up(config, &build, observed.as_ref()).await;
        report_logs(device, listener, config.log_output.as_ref()).await;
        let elapsed = start.elapsed();
        config.build_provider.clean_up(&build).await;
        if resumed {
            // Listeners hear the end from the resumed run; this saver does not.
            listener.end_log_saver(elapsed).await;
        } else {
            listener.invocation_ended(elapsed).await;
        }

        match rethrown.or(teardown_error) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn prepare_and_run(
        &self,
        config: &Configuration,
        device: &dyn Device,
        build: &BuildInfo,
        listener: &dyn InvocationListener,
        log: &InvocationLog,
    ) -> InvocationResult<()> {
        self.run_util.allow_interrupt(true);
        log_battery_level(device, log, "initial -> setup").await;
        self.do_setup(config, device, build, log).await?;
        log_battery_level(device, log, "setup -> test").await;
        self.run_tests(config, device, build, listener, log).await?;
        log_battery_level(device, log, "after test").await;
        Ok(())
    }

    async fn do_setup(
        &self,
        config: &Configuration,
        device: &dyn Device,
        build: &BuildInfo,
        log: &InvocationLog,
    ) -> InvocationResult<()> {
        for preparer in &config.target_preparers {
            self.run_util.check_interrupted()?;
            log.debug(format!("Running target preparer {}", preparer.name()));
            preparer.set_up(device, build).await?;
        }
        Ok(())
    }

    async fn run_tests(
        &self,
        config: &Configuration,
        device: &dyn Device,
        build: &BuildInfo,
        listener: &dyn InvocationListener,
        log: &InvocationLog,
    ) -> InvocationResult<()> {
        for test in &config.tests {
            self.run_util.check_interrupted()?;
            let mut ctx = RunContext::new(log, &self.run_util);
            if test.requires_device() {
                ctx = ctx.with_device(device);
            }
            if test.receives_build() {
                ctx = ctx.with_build(build);
            }
            log.debug(format!("Running test {}", test.name()));
            test.run(&ctx, listener).await?;
        }
        Ok(())
    }

    async fn start_invocation(
        &self,
        device: &dyn Device,
        build: &BuildInfo,
        listener: &dyn InvocationListener,
        log: &InvocationLog,
    ) {
        let mut msg = format!("Starting invocation for '{}'", build.test_tag);
        if build.is_known() {
            msg.push_str(" on build ");
            msg.push_str(&build.description());
        }
        for value in build.attributes.values() {
            msg.push(' ');
            msg.push_str(value);
        }
        msg.push_str(" on device ");
        msg.push_str(device.serial_number());
        log.info(&msg);
        self.set_status(format!(
            "running {} on build {}",
            build.test_tag,
            build.description()
        ));
        listener.invocation_started(build).await;
    }

    async fn report_failure(
        &self,
        error: &InvocationError,
        listener: &dyn InvocationListener,
        config: &Configuration,
        build: &BuildInfo,
        rescheduler: &dyn Rescheduler,
    ) {
        listener.invocation_failed(error).await;
        if error.marks_build_not_tested() {
            config.build_provider.build_not_tested(build).await;
            self.reschedule_test(config, rescheduler);
        }
    }

    /// Asks for the whole command to be retried if a retriable test wants it.
    fn reschedule_test(&self, config: &Configuration, rescheduler: &dyn Rescheduler) {
        if config.command_options.loop_mode {
            return;
        }
        let retriable = config
            .tests
            .iter()
            .any(|t| t.as_retriable().is_some_and(|r| r.is_retriable()));
        if retriable && !rescheduler.reschedule_command() {
            warn!("Command could not be rescheduled");
        }
    }
}

impl std::fmt::Display for TestInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.status())
    }
}

/// Runs every cleaner in reverse configuration order.
///
/// A failing cleaner does not stop the walk; the first error is returned
/// once all cleaners ran. Device loss stops the walk right away since no
/// further cleaner can reach the device, and is returned even if an
/// earlier cleaner already failed.
async fn do_teardown(
    config: &Configuration,
    device: &dyn Device,
    build: &BuildInfo,
    observed: Option<&InvocationError>,
    log: &InvocationLog,
) -> InvocationResult<()> {
    device.clear_last_connected_wifi_network().await;
    let mut first_error: Option<InvocationError> = None;
    for preparer in config.target_preparers.iter().rev() {
        let Some(cleaner) = preparer.as_cleaner() else {
            continue;
        };
        if let Err(e) = cleaner.tear_down(device, build, observed).await {
            log.warn(format!("Teardown of {} failed: {}", preparer.name(), e));
            if e.is_structural() {
                // Device loss outranks any earlier cleaner error.
                log.warn("Device lost during teardown, skipping remaining cleaners");
                return Err(e);
            }
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Runs every host cleaner in reverse configuration order.
async fn do_clean_up(config: &Configuration, build: &BuildInfo, observed: Option<&InvocationError>) {
    for preparer in config.target_preparers.iter().rev() {
        if let Some(cleaner) = preparer.as_host_cleaner() {
            cleaner.clean_up(build, observed).await;
        }
    }
}

/// Forwards the device, emulator and host logs, then releases them.
///
/// The host log is closed afterwards; later lines are dropped.
async fn report_logs(
    device: &dyn Device,
    listener: &dyn InvocationListener,
    log_output: &dyn LogOutput,
) {
    let logcat = device.logcat().await;
    device.stop_logcat().await;
    let emulator_output = if device.is_emulator() {
        device.emulator_output().await
    } else {
        None
    };
    let host_log = log_output.log();

    if let Some(source) = &logcat {
        listener
            .test_log(DEVICE_LOG_NAME, LogDataType::Logcat, source.as_ref())
            .await;
    }
    if let Some(source) = &emulator_output {
        listener
            .test_log(EMULATOR_LOG_NAME, LogDataType::Text, source.as_ref())
            .await;
    }
    listener
        .test_log(HOST_LOG_NAME, LogDataType::Text, host_log.as_ref())
        .await;

    for source in logcat.iter().chain(emulator_output.iter()) {
        source.cancel();
    }
    host_log.cancel();
    log_output.close_log();
}

async fn take_bugreport(device: &dyn Device, listener: &dyn InvocationListener, name: &str) {
    let bugreport: Box<dyn InputStreamSource> = device.bugreport().await;
    listener
        .test_log(name, LogDataType::Bugreport, bugreport.as_ref())
        .await;
    bugreport.cancel();
}

async fn log_battery_level(device: &dyn Device, log: &InvocationLog, event: &str) {
    match tokio::time::timeout(BATTERY_QUERY_TIMEOUT, device.battery_level()).await {
        Ok(Ok(level)) => log.debug(format!("battery - {} - {}%", event, level)),
        _ => log.debug("Failed to get battery level"),
    }
}
