//! Settings schema.
//!
//! ```text
//! Settings (root)
//! ├── CommandOptions   [invocation]  loop mode, bugreport on end
//! ├── DeviceOptions    [device]      logcat capture
//! ├── SchedulerConfig  [scheduler]   parallelism of the local scheduler
//! └── LogSaverConfig   [log_saver]   where logs are written
//! ```
//!
//! Every section and every field is optional.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use crate::device::DeviceOptions;

/// Root of a settings file.
///
/// # TOML Structure
///
/// ```toml
/// [invocation]
/// loop_mode = false
/// bugreport_on_invocation_ended = true
///
/// [device]
/// logcat_capture = true
///
/// [scheduler]
/// max_parallel = 4
///
/// [log_saver]
/// root_dir = "/var/log/tradeflow"
/// url_prefix = "https://logs.example.com"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    /// Options of every invocation.
    #[serde(default)]
    pub invocation: CommandOptions,

    /// Options applied to the device before each invocation.
    #[serde(default)]
    pub device: DeviceOptions,

    /// Local scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// File-system log saver settings.
    #[serde(default)]
    pub log_saver: LogSaverConfig,
}

/// Options that change how an invocation reacts to its outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommandOptions {
    /// The command is re-run continuously by its scheduler.
    ///
    /// Looping commands are never rescheduled after a failure, the next
    /// iteration already retries them.
    #[serde(default)]
    pub loop_mode: bool,

    /// Capture a bugreport at the end of every invocation, before teardown.
    #[serde(default)]
    pub bugreport_on_invocation_ended: bool,
}

/// Local scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Maximum number of invocations running at once.
    ///
    /// Default: 1
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

fn default_max_parallel() -> usize {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
        }
    }
}

/// File-system log saver settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogSaverConfig {
    /// Directory logs are written below.
    ///
    /// Default: `tradeflow-logs`
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Prefix of the URLs reported for saved logs. `file://` URLs are
    /// reported when unset.
    pub url_prefix: Option<String>,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("tradeflow-logs")
}

impl Default for LogSaverConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            url_prefix: None,
        }
    }
}
