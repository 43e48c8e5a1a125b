//! The device an invocation runs against.
//!
//! Device communication is out of scope for this crate; the engine only
//! needs the narrow surface described by [`Device`]. Implementations wrap
//! whatever transport talks to the real hardware or emulator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::InvocationResult;
use crate::log::InputStreamSource;

/// Timeout used when sampling the battery level for telemetry.
pub const BATTERY_QUERY_TIMEOUT: Duration = Duration::from_millis(500);

/// Connection state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Online,
    Offline,
    Recovery,
    Fastboot,
    NotAvailable,
}

/// Per-invocation device settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOptions {
    /// Capture the device log (logcat) for the duration of the invocation.
    ///
    /// Default: true
    #[serde(default = "default_logcat_capture")]
    pub logcat_capture: bool,
}

fn default_logcat_capture() -> bool {
    true
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            logcat_capture: default_logcat_capture(),
        }
    }
}

/// Strategy for bringing a device back after it drops off.
#[async_trait]
pub trait DeviceRecovery: Send + Sync {
    /// Attempts to recover the device with the given serial.
    async fn recover(&self, serial: &str) -> InvocationResult<()>;
}

/// Recovery that never attempts anything.
pub struct NoRecovery;

#[async_trait]
impl DeviceRecovery for NoRecovery {
    async fn recover(&self, serial: &str) -> InvocationResult<()> {
        Err(crate::error::InvocationError::device_not_available(
            serial,
            "recovery disabled",
        ))
    }
}

/// The device surface consumed by the invocation engine.
#[async_trait]
pub trait Device: Send + Sync {
    /// Serial number identifying the device.
    fn serial_number(&self) -> &str;

    /// Current connection state.
    async fn state(&self) -> DeviceState;

    /// Returns `true` for emulators, whose console output is also collected.
    fn is_emulator(&self) -> bool {
        false
    }

    /// Applies per-invocation options.
    async fn set_options(&self, options: &DeviceOptions);

    /// Installs the recovery strategy used while the invocation runs.
    async fn set_recovery(&self, recovery: Arc<dyn DeviceRecovery>);

    /// Forgets the last connected wifi network so it cannot interfere with
    /// setup or teardown.
    async fn clear_last_connected_wifi_network(&self);

    /// Starts background capture of the device log.
    async fn start_logcat(&self);

    /// Stops background capture of the device log.
    async fn stop_logcat(&self);

    /// Device log captured so far, if capture is running.
    async fn logcat(&self) -> Option<Box<dyn InputStreamSource>>;

    /// Emulator console output, if this is an emulator.
    async fn emulator_output(&self) -> Option<Box<dyn InputStreamSource>> {
        None
    }

    /// Captures a bugreport.
    async fn bugreport(&self) -> Box<dyn InputStreamSource>;

    /// Current battery level in percent.
    async fn battery_level(&self) -> InvocationResult<u8>;
}
