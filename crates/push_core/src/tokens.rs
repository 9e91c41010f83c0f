use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::DeviceToken;
use crate::store::{token_key, ObjectStore};

/// Reads `tokens/<device>.json`.
///
/// An absent or malformed record is a missing token. Any other storage
/// failure is returned so the caller can retry on a later run instead of
/// treating the device as unregistered.
pub fn read_token(store: &dyn ObjectStore, device: &str) -> Result<DeviceToken> {
    if device.is_empty() {
        return Ok(DeviceToken::missing(device));
    }
    let key = token_key(device);
    let bytes = match store.read(&key) {
        Ok(bytes) => bytes,
        Err(Error::NotFound(_)) => {
            tracing::debug!(%device, "no device token");
            return Ok(DeviceToken::missing(device));
        }
        Err(err) => return Err(err),
    };
    match serde_json::from_slice::<DeviceToken>(&bytes) {
        Ok(token) => Ok(token),
        Err(err) => {
            tracing::warn!(%device, %err, "malformed device token");
            Ok(DeviceToken::missing(device))
        }
    }
}

/// Per-run memo of device tokens. Read failures are not cached.
pub struct TokenCache<'a> {
    store: &'a dyn ObjectStore,
    tokens: HashMap<String, DeviceToken>,
}

impl<'a> TokenCache<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self {
            store,
            tokens: HashMap::new(),
        }
    }

    pub fn resolve(&mut self, device: &str) -> Result<DeviceToken> {
        if let Some(token) = self.tokens.get(device) {
            return Ok(token.clone());
        }
        let token = read_token(self.store, device)?;
        self.tokens.insert(device.to_string(), token.clone());
        Ok(token)
    }
}
