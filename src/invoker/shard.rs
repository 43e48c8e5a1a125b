//! Splitting a configuration into shards.

use std::sync::Arc;
use std::time::Duration;

use crate::build::{BuildInfo, BuildProvider, ExistingBuildProvider};
use crate::config::Configuration;
use crate::error::InvocationError;
use crate::log::InvocationLog;
use crate::result::{InvocationListener, ShardListener, ShardMasterResultForwarder};
use crate::scheduler::Rescheduler;
use crate::testtype::RemoteTest;

/// Tries to shard `config`. Returns `true` if it was sharded, in which
/// case the invocation must not run the configuration itself.
///
/// Every shardable test is split; tests that cannot be split run whole in
/// a shard of their own. Each shard gets a fork of `build`, a fresh log
/// output and log saver, clones of the shard-aware listeners and a
/// [`ShardListener`] reporting into one master forwarder shared by all
/// shards. The original build is released once every shard is handed to
/// `rescheduler`.
pub(super) async fn shard_config(
    config: &Configuration,
    build: &BuildInfo,
    rescheduler: &dyn Rescheduler,
    log: &InvocationLog,
) -> bool {
    let mut pieces: Vec<Arc<dyn RemoteTest>> = Vec::new();
    let mut sharded = false;
    for test in &config.tests {
        match test.as_shardable().and_then(|s| s.split()) {
            Some(shards) if !shards.is_empty() => {
                log.debug(format!("Split {} into {} shards", test.name(), shards.len()));
                pieces.extend(shards);
                sharded = true;
            }
            _ => pieces.push(test.clone()),
        }
    }
    if !sharded {
        return false;
    }

    // Listeners without a shard clone only see the aggregated lifecycle.
    // The clones made here go to the first shard.
    let mut first_clones = Vec::new();
    let mut master_listeners = Vec::new();
    for listener in &config.listeners {
        match listener.clone_for_shard() {
            Some(clone) => first_clones.push(clone),
            None => master_listeners.push(listener.clone()),
        }
    }
    let master = Arc::new(ShardMasterResultForwarder::new(
        master_listeners,
        pieces.len(),
    ));
    master.invocation_started(build).await;

    let mut first_clones = Some(first_clones);
    for (index, piece) in pieces.into_iter().enumerate() {
        log.info(format!("Rescheduling sharded config {}...", index));
        let shard_build = build.fork();
        let provider = Arc::new(ExistingBuildProvider::new(
            shard_build.clone(),
            config.build_provider.clone(),
        ));
        let mut shard = config.for_child(provider.clone());
        shard.tests = vec![piece];
        let mut listeners = match first_clones.take() {
            Some(clones) => clones,
            None => config
                .listeners
                .iter()
                .filter_map(|l| l.clone_for_shard())
                .collect(),
        };
        listeners.push(Arc::new(ShardListener::new(master.clone())));
        shard.listeners = listeners;

        if !rescheduler.schedule_config(shard) {
            // Nobody will run this shard: settle its part of the aggregate.
            log.warn(format!("Shard {} could not be scheduled", index));
            provider.clean_up(&shard_build).await;
            master
                .invocation_failed(&InvocationError::Runtime(format!(
                    "shard {} of build {} could not be scheduled",
                    index, build.build_id
                )))
                .await;
            master.invocation_ended(Duration::ZERO).await;
        }
    }

    config.build_provider.clean_up(build).await;
    true
}
