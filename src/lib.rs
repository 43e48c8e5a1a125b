//! tradeflow: an invocation engine for device test runs.
//!
//! An invocation takes one device and one [`Configuration`]: it fetches a
//! build, decides whether to shard the work, prepares the device, runs the
//! tests and fans every result out to the configured listeners while
//! persisting logs exactly once. Teardown and cleanup always run.
//!
//! # Architecture
//!
//! - **Invoker** ([`invoker`]): the per-device lifecycle and its failure
//!   handling, including sharding and resuming after device loss.
//! - **Results** ([`result`]): listeners, the log-saving forwarder and the
//!   shard aggregation that folds K shards into one lifecycle.
//! - **Scheduler** ([`scheduler`]): where shards and resumed remainders
//!   go; [`LocalScheduler`] runs them on a pool of local devices.
//! - **Collaborators** ([`build`], [`device`], [`preparer`], [`testtype`]):
//!   the narrow interfaces the engine drives.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tradeflow::{Configuration, DevicePool, LocalScheduler, Rescheduler};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     tradeflow::log::init_tracing(false)?;
//!     let settings = tradeflow::config::load_settings(std::path::Path::new("tradeflow.toml"))?;
//!
//!     let config = Configuration::new(build_provider, log_saver)
//!         .with_settings(&settings)
//!         .with_test(suite);
//!
//!     let scheduler = Arc::new(LocalScheduler::new(settings.scheduler.clone()));
//!     scheduler.schedule_config(config);
//!     let report = scheduler.run(DevicePool::with_devices(devices)).await;
//!     println!("{:?}", report);
//!     Ok(())
//! }
//! ```

pub mod build;
pub mod config;
pub mod device;
pub mod error;
pub mod invoker;
pub mod log;
pub mod preparer;
pub mod result;
pub mod run_util;
pub mod scheduler;
pub mod testtype;

// Re-export commonly used types
pub use build::{BuildInfo, BuildProvider};
pub use config::{Configuration, Settings, load_settings, load_settings_str};
pub use device::Device;
pub use error::{BuildRetrievalError, InvocationError, InvocationResult};
pub use invoker::TestInvocation;
pub use result::{InvocationListener, LogSaverResultForwarder, ShardMasterResultForwarder};
pub use scheduler::{DevicePool, LocalScheduler, Rescheduler, ScheduleReport};
