//! Reads pending requests out of the local mirror.

use crate::cleanup::Cleanup;
use crate::error::{Error, Result};
use crate::model::Request;
use crate::store::{key_stem, ObjectStore, REQUESTS_PREFIX};

#[derive(Debug, Default)]
pub struct LoadedRequests {
    pub requests: Vec<Request>,
    /// Keys of records that were empty or unparseable and got deleted.
    pub corrupt: Vec<String>,
    /// Keys the store failed to read. Both copies are kept for the next run.
    pub unreadable: Vec<String>,
}

/// Loads every `requests/*.json` record in key order.
///
/// Empty and malformed records are deleted from both stores and left out of
/// the result. A record the store cannot read is skipped and kept. Failing
/// to list the requests area is the only hard error.
pub fn load_requests(local: &dyn ObjectStore, cleanup: &mut Cleanup<'_>) -> Result<LoadedRequests> {
    let mut loaded = LoadedRequests::default();

    for key in local.list(REQUESTS_PREFIX)? {
        if !key.ends_with(".json") || key.matches('/').count() != 1 {
            tracing::debug!(%key, "ignoring non-request record");
            continue;
        }
        match read_request(local, &key) {
            Ok(Some(request)) => loaded.requests.push(request),
            Ok(None) => {
                tracing::warn!(%key, "empty request record");
                cleanup.remove_record(&key, "empty");
                loaded.corrupt.push(key);
            }
            Err(err @ Error::Json { .. }) => {
                tracing::warn!(%key, %err, "malformed request record");
                cleanup.remove_record(&key, "malformed");
                loaded.corrupt.push(key);
            }
            Err(err) => {
                tracing::warn!(%key, %err, "failed to read request record; keeping it");
                loaded.unreadable.push(key);
            }
        }
    }

    Ok(loaded)
}

fn read_request(local: &dyn ObjectStore, key: &str) -> Result<Option<Request>> {
    let bytes = local.read(key)?;
    if bytes.is_empty() {
        return Ok(None);
    }
    let mut request: Request = serde_json::from_slice(&bytes).map_err(|err| Error::json(key, err))?;
    request.backend_key = key_stem(key).to_string();
    Ok(Some(request))
}
