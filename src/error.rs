//! Failure taxonomy for invocations.
//!
//! Every error that can escape a phase of an invocation is an
//! [`InvocationError`]. The engine classifies each variant to decide
//! whether to capture a bugreport, mark the build as not tested, ask the
//! rescheduler for another attempt, and whether to hand the error back to
//! the caller.
//!
//! | Variant | Not tested | Reschedule | Returned as `Err` |
//! |---------|-----------|------------|-------------------|
//! | `BuildRetrieval` | n/a | no | no |
//! | `Build` | no | no | no |
//! | `TargetSetup` | yes | if retriable | no |
//! | `DeviceNotAvailable` / `DeviceUnresponsive` | yes, unless resumed | resume first | yes |
//! | `RunInterrupted` | no | no | no |
//! | `Assertion` / `Runtime` | yes | if retriable | yes |

use crate::build::BuildInfo;

/// Result type for invocation phases and collaborators.
pub type InvocationResult<T> = Result<T, InvocationError>;

/// The build provider could not produce a build.
///
/// The provider may still know something about the build it was trying
/// to fetch; when it does, that partial [`BuildInfo`] is what listeners
/// see in `invocation_started` for the degenerate lifecycle.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Failed to retrieve build: {message}")]
pub struct BuildRetrievalError {
    /// Human-readable reason.
    pub message: String,

    /// Partially known build, if any.
    pub build: Option<BuildInfo>,
}

impl BuildRetrievalError {
    /// Creates a retrieval error without build information.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            build: None,
        }
    }

    /// Attaches the partially known build.
    pub fn with_build(mut self, build: BuildInfo) -> Self {
        self.build = Some(build);
        self
    }
}

/// Errors raised while running an invocation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvocationError {
    /// No build could be fetched. No device work happened.
    #[error(transparent)]
    BuildRetrieval(#[from] BuildRetrievalError),

    /// The build itself is broken (e.g. it failed to boot or flash).
    #[error("Build error: {0}")]
    Build(String),

    /// A target preparer could not set up the device.
    #[error("Target setup failed: {0}")]
    TargetSetup(String),

    /// The device disappeared.
    #[error("Device {serial} not available: {message}")]
    DeviceNotAvailable {
        /// Serial of the lost device.
        serial: String,
        /// What was being attempted.
        message: String,
    },

    /// The device is still visible but stopped responding.
    #[error("Device {serial} unresponsive: {message}")]
    DeviceUnresponsive {
        /// Serial of the device.
        serial: String,
        /// What was being attempted.
        message: String,
    },

    /// An external interrupt was delivered inside the interruptible window.
    #[error("Run interrupted: {0}")]
    RunInterrupted(String),

    /// A test harness assertion failed.
    #[error("Assertion failed: {0}")]
    Assertion(String),

    /// Any other unexpected failure.
    #[error("Unexpected error: {0}")]
    Runtime(String),
}

impl InvocationError {
    /// Creates a device-not-available error.
    pub fn device_not_available(serial: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeviceNotAvailable {
            serial: serial.into(),
            message: message.into(),
        }
    }

    /// Creates a device-unresponsive error.
    pub fn device_unresponsive(serial: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeviceUnresponsive {
            serial: serial.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for errors meaning the device was lost.
    ///
    /// Unresponsive devices count as lost.
    pub fn is_device_loss(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotAvailable { .. } | Self::DeviceUnresponsive { .. }
        )
    }

    /// Returns `true` if the build under test is at fault.
    pub fn is_build_error(&self) -> bool {
        matches!(self, Self::Build(_))
    }

    /// Returns `true` if reporting this failure marks the build as not
    /// tested and may trigger a retry of the command.
    pub fn marks_build_not_tested(&self) -> bool {
        matches!(
            self,
            Self::TargetSetup(_)
                | Self::DeviceNotAvailable { .. }
                | Self::DeviceUnresponsive { .. }
                | Self::Assertion(_)
                | Self::Runtime(_)
        )
    }

    /// Returns `true` if the caller of `invoke` must receive this error.
    pub fn is_rethrown(&self) -> bool {
        self.is_device_loss() || matches!(self, Self::Assertion(_) | Self::Runtime(_))
    }

    /// Returns `true` if no further device work makes sense after this
    /// error. A structural error aborts the remaining teardown steps.
    pub fn is_structural(&self) -> bool {
        self.is_device_loss()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_loss_classification() {
        let lost = InvocationError::device_not_available("serial-1", "adb offline");
        let unresponsive = InvocationError::device_unresponsive("serial-1", "shell timeout");

        assert!(lost.is_device_loss());
        assert!(unresponsive.is_device_loss());
        assert!(lost.is_structural());
        assert!(lost.is_rethrown());
        assert!(lost.marks_build_not_tested());
    }

    #[test]
    fn test_absorbed_errors() {
        let build = InvocationError::Build("bootloop".into());
        assert!(build.is_build_error());
        assert!(!build.marks_build_not_tested());
        assert!(!build.is_rethrown());

        let interrupted = InvocationError::RunInterrupted("shutdown".into());
        assert!(!interrupted.marks_build_not_tested());
        assert!(!interrupted.is_rethrown());

        let setup = InvocationError::TargetSetup("flash failed".into());
        assert!(setup.marks_build_not_tested());
        assert!(!setup.is_rethrown());
    }

    #[test]
    fn test_fatal_errors_are_rethrown() {
        assert!(InvocationError::Assertion("x".into()).is_rethrown());
        assert!(InvocationError::Runtime("x".into()).is_rethrown());
        assert!(!InvocationError::Runtime("x".into()).is_structural());
    }

    #[test]
    fn test_retrieval_error_display() {
        let err: InvocationError = BuildRetrievalError::new("no such build").into();
        assert_eq!(err.to_string(), "Failed to retrieve build: no such build");
    }
}
