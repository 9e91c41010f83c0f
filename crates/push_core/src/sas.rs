//! Shared-access signatures for the notification hub relay.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub const KEY_NAME: &str = "DefaultFullSharedAccessSignature";
pub const VALIDITY_MINUTES: i64 = 60;

/// `https://{namespace}.servicebus.windows.net/{hub}/messages`
pub fn hub_url(namespace: &str, hub: &str) -> String {
    format!("https://{namespace}.servicebus.windows.net/{hub}/messages")
}

/// Form-style percent encoding (spaces become `+`) with the unreserved set
/// the hub verifies against: `~` stays literal and `*` is escaped.
pub fn quote_plus(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes())
        .map(|chunk| match chunk {
            "%7E" => "~".to_string(),
            _ => chunk.replace('*', "%2A"),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasToken {
    /// Percent-encoded resource URI.
    pub resource: String,
    /// Base64 HMAC-SHA256 signature, before percent-encoding.
    pub signature: String,
    /// Unix seconds.
    pub expires_at: i64,
}

impl SasToken {
    /// Signs `url` with `key`, valid for [`VALIDITY_MINUTES`] from `now`.
    pub fn issue(url: &str, key: &str, now: DateTime<Utc>) -> Result<Self> {
        let expires_at = (now + Duration::minutes(VALIDITY_MINUTES)).timestamp();
        let resource = quote_plus(url);
        let signing_string = format!("{resource}\n{expires_at}");

        let mut mac = HmacSha256::new_from_slice(key.as_bytes())
            .map_err(|err| Error::Signing(err.to_string()))?;
        mac.update(signing_string.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        Ok(Self {
            resource,
            signature,
            expires_at,
        })
    }

    pub fn header_value(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SasToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
            self.resource,
            quote_plus(&self.signature),
            self.expires_at,
            quote_plus(KEY_NAME)
        )
    }
}
