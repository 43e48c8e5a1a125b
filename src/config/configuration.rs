//! Runtime configuration of one invocation.

use std::fmt;
use std::sync::Arc;

use super::schema::{CommandOptions, Settings};
use crate::build::BuildProvider;
use crate::device::{DeviceOptions, DeviceRecovery, NoRecovery};
use crate::log::{LogOutput, MemoryLogOutput};
use crate::preparer::TargetPreparer;
use crate::result::{InvocationListener, LogSaver};
use crate::testtype::RemoteTest;

/// Collaborators and options an invocation is driven by.
///
/// Cloning is cheap and yields an independent configuration: the lists can
/// be changed on the clone without affecting the original. Collaborators
/// themselves are shared; [`for_child`](Self::for_child) gives a clone its
/// own log output and log saver.
///
/// # Example
///
/// ```ignore
/// let config = Configuration::new(provider, saver)
///     .with_preparer(flasher)
///     .with_test(suite)
///     .with_listener(Arc::new(ConsoleReporter::new(false)));
/// ```
#[derive(Clone)]
pub struct Configuration {
    pub build_provider: Arc<dyn BuildProvider>,
    pub device_recovery: Arc<dyn DeviceRecovery>,

    /// Run in order during setup, cleaners in reverse during teardown.
    pub target_preparers: Vec<Arc<dyn TargetPreparer>>,

    /// Run in order.
    pub tests: Vec<Arc<dyn RemoteTest>>,

    /// Receive every event, in order.
    pub listeners: Vec<Arc<dyn InvocationListener>>,

    pub log_output: Arc<dyn LogOutput>,
    pub log_saver: Arc<dyn LogSaver>,
    pub command_options: CommandOptions,
    pub device_options: DeviceOptions,

    /// Command line this configuration was created from, for the log.
    pub command_line: Option<String>,
}

impl Configuration {
    /// Creates a configuration with no preparers, tests or listeners, an
    /// in-memory log output and no device recovery.
    pub fn new(build_provider: Arc<dyn BuildProvider>, log_saver: Arc<dyn LogSaver>) -> Self {
        Self {
            build_provider,
            device_recovery: Arc::new(NoRecovery),
            target_preparers: Vec::new(),
            tests: Vec::new(),
            listeners: Vec::new(),
            log_output: Arc::new(MemoryLogOutput::default()),
            log_saver,
            command_options: CommandOptions::default(),
            device_options: DeviceOptions::default(),
            command_line: None,
        }
    }

    /// Applies the invocation and device sections of `settings`.
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.command_options = settings.invocation.clone();
        self.device_options = settings.device.clone();
        self
    }

    pub fn with_recovery(mut self, recovery: Arc<dyn DeviceRecovery>) -> Self {
        self.device_recovery = recovery;
        self
    }

    pub fn with_preparer(mut self, preparer: Arc<dyn TargetPreparer>) -> Self {
        self.target_preparers.push(preparer);
        self
    }

    pub fn with_test(mut self, test: Arc<dyn RemoteTest>) -> Self {
        self.tests.push(test);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn InvocationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_log_output(mut self, output: Arc<dyn LogOutput>) -> Self {
        self.log_output = output;
        self
    }

    pub fn with_command_options(mut self, options: CommandOptions) -> Self {
        self.command_options = options;
        self
    }

    pub fn with_command_line(mut self, command_line: impl Into<String>) -> Self {
        self.command_line = Some(command_line.into());
        self
    }

    /// Clone for a child invocation (a shard or a resumed remainder).
    ///
    /// The child fetches its build from `build_provider` and gets a fresh
    /// log output and log saver so its logs stay separate.
    pub fn for_child(&self, build_provider: Arc<dyn BuildProvider>) -> Self {
        Self {
            build_provider,
            log_output: self.log_output.clone_output(),
            log_saver: self.log_saver.clone_saver(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tests: Vec<&str> = self.tests.iter().map(|t| t.name()).collect();
        let preparers: Vec<&str> = self.target_preparers.iter().map(|p| p.name()).collect();
        f.debug_struct("Configuration")
            .field("tests", &tests)
            .field("target_preparers", &preparers)
            .field("listeners", &self.listeners.len())
            .field("command_options", &self.command_options)
            .field("device_options", &self.device_options)
            .field("command_line", &self.command_line)
            .finish_non_exhaustive()
    }
}
