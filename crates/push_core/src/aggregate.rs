//! Per-device accumulation of coalesced update requests.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::model::{Request, UpdateBatch, UpdateEntry};
use crate::store::{update_batch_key, ObjectStore};

/// A batch that has been written to the local mirror.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedBatch {
    pub key: String,
    pub batch: UpdateBatch,
}

#[derive(Debug, Default)]
pub struct UpdateAggregator {
    pending: BTreeMap<String, Vec<UpdateEntry>>,
}

impl UpdateAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the request's update; callers feed requests newest first.
    /// Returns `false` for requests without an update payload.
    pub fn add(&mut self, request: &Request) -> bool {
        let Some(entry) = request.update_entry() else {
            return false;
        };
        self.pending
            .entry(request.device.clone())
            .or_default()
            .push(entry);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Writes one freshly named record per device, in device order.
    ///
    /// A batch that cannot be written is logged and left out of the result.
    pub fn persist(self, local: &dyn ObjectStore) -> Vec<PersistedBatch> {
        let mut persisted = Vec::with_capacity(self.pending.len());
        for (device, entries) in self.pending {
            let batch = UpdateBatch { device, entries };
            let key = update_batch_key(&batch.device, &Uuid::new_v4().to_string());
            let written = batch
                .to_json()
                .map_err(|err| crate::Error::json(key.as_str(), err))
                .and_then(|bytes| local.write(&key, &bytes));
            match written {
                Ok(()) => {
                    tracing::debug!(device = %batch.device, %key, entries = batch.entries.len(), "wrote update batch");
                    persisted.push(PersistedBatch { key, batch });
                }
                Err(err) => {
                    tracing::error!(device = %batch.device, %key, %err, "failed to write update batch");
                }
            }
        }
        persisted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UpdatePayload;
    use crate::store::FsStore;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn update(id: &str, device: &str, content: &str) -> Request {
        Request {
            id: id.into(),
            creation_time: Utc.timestamp_opt(0, 0).unwrap(),
            scheduled_time: Utc.timestamp_opt(0, 0).unwrap(),
            device: device.into(),
            format: "gcm".into(),
            protocol: String::new(),
            title: String::new(),
            body: String::new(),
            sound: String::new(),
            update: Some(UpdatePayload {
                kind: "SurveyAgentPolicy".into(),
                content: serde_json::Value::String(content.into()),
            }),
            backend_key: id.into(),
        }
    }

    #[test]
    fn groups_by_device_preserving_feed_order() {
        let mut aggregator = UpdateAggregator::new();
        assert!(aggregator.add(&update("1", "d2", "A")));
        assert!(aggregator.add(&update("2", "d1", "B")));
        assert!(aggregator.add(&update("3", "d2", "C")));

        let temp = tempdir().unwrap();
        let batches = aggregator.persist(&FsStore::new(temp.path()));
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].batch.device, "d1");
        let d2: Vec<&str> = batches[1].batch.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(d2, vec!["1", "3"]);
    }

    #[test]
    fn ignores_plain_requests() {
        let mut aggregator = UpdateAggregator::new();
        let mut plain = update("1", "d1", "A");
        plain.update = None;
        assert!(!aggregator.add(&plain));
        assert!(aggregator.is_empty());
    }

    #[test]
    fn persist_writes_one_record_per_device() {
        let temp = tempdir().unwrap();
        let local = FsStore::new(temp.path());
        let mut aggregator = UpdateAggregator::new();
        aggregator.add(&update("1", "d1", "A"));
        aggregator.add(&update("2", "d1", "B"));

        let persisted = aggregator.persist(&local);
        assert_eq!(persisted.len(), 1);
        assert!(persisted[0].key.starts_with("updates/d1/"));

        let stored: Vec<UpdateEntry> =
            serde_json::from_slice(&local.read(&persisted[0].key).unwrap()).unwrap();
        assert_eq!(stored, persisted[0].batch.entries);
        assert_eq!(local.list("updates/d1").unwrap().len(), 1);
    }
}
