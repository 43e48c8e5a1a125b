//! Target preparers: device setup, teardown and host cleanup.
//!
//! Preparers run in configuration order during setup. Preparers that also
//! know how to undo their work expose a [`TargetCleaner`] through
//! [`TargetPreparer::as_cleaner`]; those run in reverse order during
//! teardown. Preparers that leave files or processes on the host expose a
//! [`HostCleaner`], run in reverse order during cleanup after the device is
//! no longer touched.

use async_trait::async_trait;

use crate::build::BuildInfo;
use crate::device::Device;
use crate::error::{InvocationError, InvocationResult};

/// Sets up the device environment before tests run.
#[async_trait]
pub trait TargetPreparer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Prepares `device` for testing `build`.
    ///
    /// # Errors
    ///
    /// [`InvocationError::TargetSetup`] or [`InvocationError::Build`] for
    /// preparation failures, device-loss errors if the device drops off.
    async fn set_up(&self, device: &dyn Device, build: &BuildInfo) -> InvocationResult<()>;

    /// Teardown capability, if this preparer has one.
    fn as_cleaner(&self) -> Option<&dyn TargetCleaner> {
        None
    }

    /// Host cleanup capability, if this preparer has one.
    fn as_host_cleaner(&self) -> Option<&dyn HostCleaner> {
        None
    }
}

/// Undoes a preparer's device-side setup.
#[async_trait]
pub trait TargetCleaner: Send + Sync {
    /// Restores the device. `error` is the failure observed during the
    /// invocation, if any.
    async fn tear_down(
        &self,
        device: &dyn Device,
        build: &BuildInfo,
        error: Option<&InvocationError>,
    ) -> InvocationResult<()>;
}

/// Releases host-side resources created by a preparer.
#[async_trait]
pub trait HostCleaner: Send + Sync {
    /// Cleans up the host. Never touches the device.
    async fn clean_up(&self, build: &BuildInfo, error: Option<&InvocationError>);
}
