use anyhow::{Context, Result};
use chrono::Utc;
use push_core::dispatch::{HttpRelay, PushRelay};
use push_core::sas::hub_url;
use push_core::store::FsStore;
use push_core::{Reconciler, RunReport};
use push_sync::bind_remote;
use tracing::{info, instrument};

use crate::config::JobConfig;
use crate::lock::LockGuard;

/// Runs one pass with the HTTPS relay. Returns `None` when another run
/// holds the lock.
pub fn run(config: &JobConfig) -> Result<Option<RunReport>> {
    let relay = HttpRelay::new().context("failed to set up push relay")?;
    run_with_relay(config, Box::new(relay))
}

#[instrument(skip(config, relay), fields(lock = %config.lock_file.display()))]
pub fn run_with_relay(config: &JobConfig, relay: Box<dyn PushRelay>) -> Result<Option<RunReport>> {
    let Some(_lock) = LockGuard::acquire(&config.lock_file)? else {
        info!("lock file present; another run is in progress");
        return Ok(None);
    };
    info!(started = %Utc::now(), "starting push notification run");

    let local_root = config.local_root();
    std::fs::create_dir_all(&local_root)
        .with_context(|| format!("failed to create {}", local_root.display()))?;
    let remote = bind_remote(&config.backend, &local_root).context("failed to bind remote store")?;

    let reconciler = Reconciler::builder()
        .local_store(Box::new(FsStore::new(&local_root)))
        .remote_store(remote.store)
        .mirror(remote.mirror)
        .relay(relay)
        .hub(hub_url(&config.hub_namespace, &config.hub_name), config.hub_key.clone())
        .build()?;

    let report = reconciler.run().context("push notification run failed")?;
    info!(finished = %Utc::now(), ?report, "push notification run complete");
    Ok(Some(report))
}
