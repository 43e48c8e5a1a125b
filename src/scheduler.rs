//! Scheduling configurations onto devices.
//!
//! The engine never runs shards or resumed remainders itself: it hands them
//! to a [`Rescheduler`]. [`LocalScheduler`] is an in-process implementation
//! that runs every queued configuration on a [`DevicePool`], one tokio task
//! per invocation.
//!
//! ```text
//!   schedule_config ──► queue ──► run(pool) ──► task: TestInvocation::invoke
//!          ▲                                           │
//!          └─────── shards / resumed remainders ───────┘
//! ```

pub mod pool;

pub use pool::DevicePool;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{Configuration, SchedulerConfig};
use crate::invoker::TestInvocation;

/// Accepts work an invocation cannot or should not run itself.
pub trait Rescheduler: Send + Sync {
    /// Queues `config` to run as its own invocation. Returns `false` if
    /// it will never run.
    fn schedule_config(&self, config: Configuration) -> bool;

    /// Asks for the current command to run again later. Returns `false`
    /// if the request was refused.
    fn reschedule_command(&self) -> bool;
}

/// Outcome of [`LocalScheduler::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    /// Invocations that returned normally.
    pub completed: usize,

    /// Invocations that returned an error other than device loss.
    pub failed: usize,

    /// Invocations that lost their device. The device is not reused.
    pub device_lost: usize,

    /// Configurations still queued when no device was left.
    pub unscheduled: usize,

    /// Command reschedule requests received.
    pub reschedule_requests: usize,
}

/// In-process [`Rescheduler`] running configurations on local devices.
///
/// # Example
///
/// ```ignore
/// let scheduler = Arc::new(LocalScheduler::new(settings.scheduler.clone()));
/// scheduler.schedule_config(config);
/// let report = scheduler.run(DevicePool::with_devices(devices)).await;
/// println!("{} completed, {} failed", report.completed, report.failed);
/// ```
pub struct LocalScheduler {
    config: SchedulerConfig,
    queue: Mutex<VecDeque<Configuration>>,
    reschedule_requests: AtomicUsize,
    shut_down: AtomicBool,
}

impl LocalScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            queue: Mutex::new(VecDeque::new()),
            reschedule_requests: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Number of configurations waiting for a device.
    pub fn pending(&self) -> usize {
        self.lock_queue().len()
    }

    /// Number of command reschedule requests received so far.
    pub fn reschedule_requests(&self) -> usize {
        self.reschedule_requests.load(Ordering::SeqCst)
    }

    /// Stops accepting new configurations. Already queued ones still run.
    pub fn shutdown(&self) {
        info!("Scheduler shutting down");
        self.shut_down.store(true, Ordering::SeqCst);
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Configuration>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs queued configurations until the queue is drained.
    ///
    /// Up to `max_parallel` invocations run at once, each on its own device
    /// from `pool`. Configurations queued while running, such as shards and
    /// resumed remainders, are picked up as devices free up. Returns once
    /// nothing is running and either the queue is empty or no device is
    /// left.
    pub async fn run(self: &Arc<Self>, mut pool: DevicePool) -> ScheduleReport {
        let max_parallel = self.config.max_parallel.max(1);
        let mut running = FuturesUnordered::new();
        let mut report = ScheduleReport::default();

        loop {
            while running.len() < max_parallel {
                let Some(device) = pool.take() else {
                    break;
                };
                let Some(config) = self.lock_queue().pop_front() else {
                    pool.release(device);
                    break;
                };
                debug!("Starting {:?} on {}", config, device.serial_number());
                let scheduler = Arc::clone(self);
                running.push(tokio::spawn(async move {
                    let invocation = TestInvocation::new();
                    let result = invocation
                        .invoke(device.as_ref(), config, scheduler.as_ref(), &[])
                        .await;
                    (device, result)
                }));
            }

            let Some(joined) = running.next().await else {
                break;
            };
            match joined {
                Ok((device, Ok(()))) => {
                    report.completed += 1;
                    pool.release(device);
                }
                Ok((device, Err(e))) if e.is_device_loss() => {
                    warn!(
                        "Device {} lost, removing it from the pool: {}",
                        device.serial_number(),
                        e
                    );
                    report.device_lost += 1;
                }
                Ok((device, Err(e))) => {
                    error!("Invocation on {} failed: {}", device.serial_number(), e);
                    report.failed += 1;
                    pool.release(device);
                }
                Err(e) => {
                    error!("Invocation task failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        report.unscheduled = self.pending();
        if report.unscheduled > 0 {
            warn!(
                "{} configurations left unscheduled, no device available",
                report.unscheduled
            );
        }
        report.reschedule_requests = self.reschedule_requests();
        report
    }
}

impl Rescheduler for LocalScheduler {
    fn schedule_config(&self, config: Configuration) -> bool {
        if self.shut_down.load(Ordering::SeqCst) {
            debug!("Refusing {:?}, scheduler is shut down", config);
            return false;
        }
        self.lock_queue().push_back(config);
        true
    }

    fn reschedule_command(&self) -> bool {
        if self.shut_down.load(Ordering::SeqCst) {
            return false;
        }
        self.reschedule_requests.fetch_add(1, Ordering::SeqCst);
        true
    }
}
