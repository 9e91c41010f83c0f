//! One reconciliation pass over the push-notification outbox.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::instrument;
use uuid::Uuid;

use crate::aggregate::{PersistedBatch, UpdateAggregator};
use crate::cleanup::Cleanup;
use crate::dedup::deduplicate;
use crate::dispatch::{DispatchClient, DispatchOutcome, PushContent, PushRelay};
use crate::error::Result;
use crate::loader::load_requests;
use crate::model::Request;
use crate::policy::{self, Verdict};
use crate::sas::SasToken;
use crate::store::{device_updates_prefix, request_key, Mirror, ObjectStore, UPDATES_PREFIX};
use crate::tokens::{read_token, TokenCache};

/// Counters describing what a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub loaded: usize,
    pub corrupt: usize,
    /// Request records that could not be read and were kept for the next run.
    pub unreadable: usize,
    pub obsolete: usize,
    pub expired: usize,
    pub deferred: usize,
    pub stale: usize,
    /// Requests or batches held back because their token could not be read.
    pub token_errors: usize,
    pub pushed: usize,
    pub push_failures: usize,
    pub unsupported: usize,
    pub coalesced: usize,
    pub batches_written: usize,
    pub batches_pushed: usize,
    pub batches_discarded: usize,
    pub cleanup_failures: usize,
}

impl RunReport {
    fn record_push(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Delivered => self.pushed += 1,
            DispatchOutcome::UnsupportedFormat(_) => self.unsupported += 1,
            DispatchOutcome::Failed(_) => self.push_failures += 1,
        }
    }
}

/// Notification hub endpoint and its shared access key.
#[derive(Clone)]
pub struct HubCredentials {
    pub url: String,
    pub key: String,
}

impl std::fmt::Debug for HubCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubCredentials")
            .field("url", &self.url)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

pub struct Reconciler {
    local: Box<dyn ObjectStore>,
    remote: Box<dyn ObjectStore>,
    mirror: Box<dyn Mirror>,
    relay: Box<dyn PushRelay>,
    hub: HubCredentials,
}

#[derive(Default)]
pub struct ReconcilerBuilder {
    local: Option<Box<dyn ObjectStore>>,
    remote: Option<Box<dyn ObjectStore>>,
    mirror: Option<Box<dyn Mirror>>,
    relay: Option<Box<dyn PushRelay>>,
    hub: Option<HubCredentials>,
}

impl ReconcilerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_store(mut self, store: Box<dyn ObjectStore>) -> Self {
        self.local = Some(store);
        self
    }

    pub fn remote_store(mut self, store: Box<dyn ObjectStore>) -> Self {
        self.remote = Some(store);
        self
    }

    pub fn mirror(mut self, mirror: Box<dyn Mirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn relay(mut self, relay: Box<dyn PushRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn hub(mut self, url: impl Into<String>, key: impl Into<String>) -> Self {
        self.hub = Some(HubCredentials {
            url: url.into(),
            key: key.into(),
        });
        self
    }

    pub fn build(self) -> anyhow::Result<Reconciler> {
        Ok(Reconciler {
            local: self.local.ok_or_else(|| anyhow!("local store not configured"))?,
            remote: self.remote.ok_or_else(|| anyhow!("remote store not configured"))?,
            mirror: self.mirror.ok_or_else(|| anyhow!("mirror not configured"))?,
            relay: self.relay.ok_or_else(|| anyhow!("push relay not configured"))?,
            hub: self.hub.ok_or_else(|| anyhow!("notification hub not configured"))?,
        })
    }
}

impl Reconciler {
    pub fn builder() -> ReconcilerBuilder {
        ReconcilerBuilder::new()
    }

    pub fn run(&self) -> Result<RunReport> {
        self.run_at(Utc::now())
    }

    /// Pulls the remote store into the local mirror, then reconciles.
    #[instrument(skip(self), fields(hub = %self.hub.url))]
    pub fn run_at(&self, now: DateTime<Utc>) -> Result<RunReport> {
        self.mirror.pull()?;
        self.reconcile_at(now)
    }

    /// Processes whatever the local mirror currently holds.
    pub fn reconcile_at(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let sas = SasToken::issue(&self.hub.url, &self.hub.key, now)?;
        let dispatch = DispatchClient::new(self.relay.as_ref(), &self.hub.url, &sas);
        let mut cleanup = Cleanup::new(self.local.as_ref(), self.remote.as_ref());
        let mut report = RunReport::default();

        let loaded = load_requests(self.local.as_ref(), &mut cleanup)?;
        report.loaded = loaded.requests.len();
        report.corrupt = loaded.corrupt.len();
        report.unreadable = loaded.unreadable.len();

        let deduplicated = deduplicate(loaded.requests);
        for request in &deduplicated.obsolete {
            tracing::debug!(id = %request.id, key = %request.backend_key, "superseded by newer request");
            cleanup.remove_record(&request_key(&request.backend_key), "obsolete");
            report.obsolete += 1;
        }

        let mut tokens = TokenCache::new(self.local.as_ref());
        let mut aggregator = UpdateAggregator::new();
        for request in &deduplicated.survivors {
            let verdict = policy::evaluate(request, now, |device| tokens.resolve(device));
            tracing::debug!(
                id = %request.id,
                key = %request.backend_key,
                device = %request.device,
                verdict = verdict.label(),
                "evaluated request"
            );
            let key = request_key(&request.backend_key);
            match verdict {
                Verdict::Expired => {
                    cleanup.remove_record(&key, "expired");
                    report.expired += 1;
                }
                Verdict::Deferred => report.deferred += 1,
                Verdict::Stale => {
                    cleanup.remove_record(&key, "stale");
                    report.stale += 1;
                }
                Verdict::TokenUnavailable(reason) => {
                    tracing::warn!(id = %request.id, device = %request.device, %reason, "device token unreadable; request kept");
                    report.token_errors += 1;
                }
                Verdict::Immediate(token) => {
                    let outcome = dispatch.send(&request.format, &token.token, &immediate_content(request));
                    report.record_push(&outcome);
                }
                Verdict::Coalesce => {
                    aggregator.add(request);
                    cleanup.remove_record(&key, "coalesced");
                    report.coalesced += 1;
                }
            }
        }

        if !aggregator.is_empty() {
            let persisted = aggregator.persist(self.local.as_ref());
            report.batches_written = persisted.len();
            if !persisted.is_empty() {
                self.mirror.push(UPDATES_PREFIX)?;
                self.dispatch_batches(&persisted, &dispatch, &mut cleanup, &mut report);
            }
        }

        report.cleanup_failures = cleanup.failures();
        tracing::info!(?report, "reconciliation finished");
        Ok(report)
    }

    fn dispatch_batches(
        &self,
        persisted: &[PersistedBatch],
        dispatch: &DispatchClient<'_>,
        cleanup: &mut Cleanup<'_>,
        report: &mut RunReport,
    ) {
        for PersistedBatch { key, batch } in persisted {
            // The token is read again: it may have been withdrawn since evaluation.
            let token = match read_token(self.local.as_ref(), &batch.device) {
                Ok(token) => token,
                Err(err) => {
                    tracing::warn!(device = %batch.device, %key, %err, "device token unreadable; batch not announced");
                    report.token_errors += 1;
                    continue;
                }
            };
            if token.is_missing() {
                tracing::warn!(device = %batch.device, %key, "device token gone; discarding updates");
                cleanup.remove_tree(&device_updates_prefix(&batch.device), "stale-device");
                report.batches_discarded += 1;
                continue;
            }

            let content = PushContent::update_signal(Uuid::new_v4().to_string(), token.protocol.as_str());
            match dispatch.send(&token.format, &token.token, &content) {
                DispatchOutcome::Delivered => report.batches_pushed += 1,
                outcome => {
                    tracing::warn!(device = %batch.device, %key, ?outcome, "update push not delivered");
                    report.record_push(&outcome);
                }
            }
        }
    }
}

fn immediate_content(request: &Request) -> PushContent {
    PushContent {
        id: request.id.clone(),
        backend_key: request.backend_key.clone(),
        protocol: request.protocol.clone(),
        title: request.title.clone(),
        body: request.body.clone(),
        sound: request.sound.clone(),
        is_update: false,
    }
}
