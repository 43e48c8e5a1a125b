//! Devices available to the local scheduler.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::device::Device;

/// Idle devices waiting for an invocation.
///
/// Devices are handed out in the order they were added and go to the back
/// of the pool when released, so work spreads across all devices.
///
/// # Example
///
/// ```ignore
/// let mut pool = DevicePool::new();
/// pool.add(device);
///
/// let device = pool.take().unwrap();
/// // ... run an invocation ...
/// pool.release(device);
/// ```
#[derive(Default)]
pub struct DevicePool {
    devices: VecDeque<Arc<dyn Device>>,
}

impl DevicePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pool holding `devices`.
    pub fn with_devices(devices: impl IntoIterator<Item = Arc<dyn Device>>) -> Self {
        Self {
            devices: devices.into_iter().collect(),
        }
    }

    pub fn add(&mut self, device: Arc<dyn Device>) {
        self.devices.push_back(device);
    }

    /// Takes the next idle device, if any.
    pub fn take(&mut self) -> Option<Arc<dyn Device>> {
        self.devices.pop_front()
    }

    /// Returns a device after its invocation finished.
    pub fn release(&mut self, device: Arc<dyn Device>) {
        self.devices.push_back(device);
    }

    /// Serial numbers of the idle devices.
    pub fn serials(&self) -> Vec<String> {
        self.devices
            .iter()
            .map(|d| d.serial_number().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
