//! Builds under test and the providers that own them.
//!
//! A [`BuildProvider`] hands out [`BuildInfo`] handles and is responsible
//! for releasing them. Every handle the engine obtains, whether fetched
//! directly or forked for a shard or a resumed run, is released through
//! [`BuildProvider::clean_up`] exactly once.
//!
//! # Forking
//!
//! Shards and resumed invocations each need their own handle on the same
//! build. [`BuildInfo::fork`] produces an independent copy with a fresh
//! [`instance`](BuildInfo::instance) id, which the engine wraps in an
//! [`ExistingBuildProvider`] so the child invocation fetches exactly that
//! copy and releases it through the original provider.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::Device;
use crate::error::BuildRetrievalError;

/// Build id used when the provider cannot identify the build.
pub const UNKNOWN_BUILD_ID: &str = "-1";

/// Handle to a build artifact under test.
///
/// # Example
///
/// ```
/// use tradeflow::build::BuildInfo;
///
/// let build = BuildInfo::new("B100", "stress")
///     .with_branch("main")
///     .with_flavor("userdebug");
///
/// let shard_copy = build.fork();
/// assert_eq!(shard_copy.build_id, "B100");
/// assert_ne!(shard_copy.instance, build.instance);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    /// Identifier of the build.
    pub build_id: String,

    /// Tag naming the test run this build is used for.
    pub test_tag: String,

    /// Branch the build came from.
    pub branch: Option<String>,

    /// Build flavor (e.g. `userdebug`).
    pub flavor: Option<String>,

    /// Serial of the device the build is being tested on.
    pub device_serial: Option<String>,

    /// Free-form attributes.
    pub attributes: BTreeMap<String, String>,

    /// Identity of this particular handle. Forks get a new one.
    pub instance: Uuid,
}

impl BuildInfo {
    /// Creates a build handle with the given id and test tag.
    pub fn new(build_id: impl Into<String>, test_tag: impl Into<String>) -> Self {
        Self {
            build_id: build_id.into(),
            test_tag: test_tag.into(),
            branch: None,
            flavor: None,
            device_serial: None,
            attributes: BTreeMap::new(),
            instance: Uuid::new_v4(),
        }
    }

    /// Placeholder build for invocations whose build is unknown.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_BUILD_ID, "stub")
    }

    /// Sets the branch.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Sets the flavor.
    pub fn with_flavor(mut self, flavor: impl Into<String>) -> Self {
        self.flavor = Some(flavor.into());
        self
    }

    /// Adds a free-form attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns an independent copy of this build with its own identity.
    pub fn fork(&self) -> Self {
        Self {
            instance: Uuid::new_v4(),
            ..self.clone()
        }
    }

    /// Returns `true` if the build id is known.
    pub fn is_known(&self) -> bool {
        self.build_id != UNKNOWN_BUILD_ID
    }

    /// Returns a user-friendly description such as `'main userdebug B100'`.
    ///
    /// Missing branch or flavor segments are skipped.
    pub fn description(&self) -> String {
        let segments: Vec<&str> = [
            self.branch.as_deref(),
            self.flavor.as_deref(),
            Some(self.build_id.as_str()),
        ]
        .into_iter()
        .flatten()
        .collect();
        format!("'{}'", segments.join(" "))
    }
}

/// Source of builds to test.
#[async_trait]
pub trait BuildProvider: Send + Sync {
    /// Fetches the build to test on `device`.
    ///
    /// Providers that do not depend on the device simply ignore it.
    /// Returns `Ok(None)` when there is currently nothing to test.
    async fn get_build(&self, device: &dyn Device)
    -> Result<Option<BuildInfo>, BuildRetrievalError>;

    /// Records that `build` could not be fully tested.
    async fn build_not_tested(&self, build: &BuildInfo);

    /// Releases all resources associated with `build`.
    async fn clean_up(&self, build: &BuildInfo);
}

/// Provider that serves one pre-fetched build.
///
/// Used for shards and resumed invocations: the forked build is handed out
/// by [`get_build`](BuildProvider::get_build), and bookkeeping calls are
/// delegated to the provider that originally fetched it.
pub struct ExistingBuildProvider {
    build: Mutex<Option<BuildInfo>>,
    parent: Arc<dyn BuildProvider>,
}

impl ExistingBuildProvider {
    /// Wraps `build`, delegating release to `parent`.
    pub fn new(build: BuildInfo, parent: Arc<dyn BuildProvider>) -> Self {
        Self {
            build: Mutex::new(Some(build)),
            parent,
        }
    }

    /// Returns a copy of the held build, if it has not been released yet.
    pub fn build(&self) -> Option<BuildInfo> {
        self.build
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl BuildProvider for ExistingBuildProvider {
    async fn get_build(
        &self,
        _device: &dyn Device,
    ) -> Result<Option<BuildInfo>, BuildRetrievalError> {
        Ok(self.build())
    }

    async fn build_not_tested(&self, build: &BuildInfo) {
        self.parent.build_not_tested(build).await;
    }

    async fn clean_up(&self, build: &BuildInfo) {
        let held = self
            .build
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take_if(|held| held.instance == build.instance);
        if held.is_none() {
            tracing::debug!(
                "Build {} ({}) is not held by this provider",
                build.build_id,
                build.instance
            );
        }
        self.parent.clean_up(build).await;
    }
}
