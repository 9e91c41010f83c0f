//! Platform payloads and the signed POST to the notification hub.

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::sas::SasToken;

pub const API_VERSION: &str = "2015-04";
const FORMAT_HEADER: &str = "ServiceBusNotification-Format";
const DEVICE_HANDLE_HEADER: &str = "ServiceBusNotification-DeviceHandle";
const VERSION_HEADER: &str = "x-ms-version";
const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";

/// Native push services the hub can forward to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFormat {
    /// Firebase / Google Cloud Messaging.
    Gcm,
    /// Apple Push Notification service.
    Apple,
}

impl PushFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "gcm" => Some(Self::Gcm),
            "apple" => Some(Self::Apple),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gcm => "gcm",
            Self::Apple => "apple",
        }
    }

    pub fn payload(self, content: &PushContent) -> Value {
        let update = if content.is_update { "true" } else { "false" };
        match self {
            Self::Gcm => json!({
                "data": {
                    "id": content.id,
                    "protocol": content.protocol,
                    "backend-key": content.backend_key,
                    "update": update,
                    "title": content.title,
                    "body": content.body,
                    "sound": content.sound,
                }
            }),
            Self::Apple => json!({
                "id": content.id,
                "protocol": content.protocol,
                "backend-key": content.backend_key,
                "update": update,
                "aps": {
                    "content-available": 1,
                    "alert": {
                        "title": content.title,
                        "body": content.body,
                    },
                    "sound": content.sound,
                }
            }),
        }
    }
}

/// What the device receives, independent of platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushContent {
    pub id: String,
    pub backend_key: String,
    pub protocol: String,
    pub title: String,
    pub body: String,
    pub sound: String,
    pub is_update: bool,
}

impl PushContent {
    /// Content-free push telling the device to fetch its pending updates.
    pub fn update_signal(id: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            protocol: protocol.into(),
            is_update: true,
            ..Self::default()
        }
    }
}

/// A fully prepared relay call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub url: String,
    pub format: PushFormat,
    pub device_handle: String,
    pub authorization: String,
    pub body: String,
}

/// Transport to the notification hub.
pub trait PushRelay: Send + Sync {
    /// Fails with [`Error::RelayStatus`] for HTTP error responses and
    /// [`Error::RelayTransport`] when the hub cannot be reached.
    fn post(&self, request: &RelayRequest) -> Result<()>;
}

/// Blocking HTTPS relay. No timeout is configured.
#[derive(Debug, Clone)]
pub struct HttpRelay {
    client: reqwest::blocking::Client,
}

impl HttpRelay {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|err| Error::RelayTransport(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }
}

impl PushRelay for HttpRelay {
    fn post(&self, request: &RelayRequest) -> Result<()> {
        let response = self
            .client
            .post(&request.url)
            .header(FORMAT_HEADER, request.format.as_str())
            .header(DEVICE_HANDLE_HEADER, request.device_handle.as_str())
            .header(VERSION_HEADER, API_VERSION)
            .header(reqwest::header::AUTHORIZATION, request.authorization.as_str())
            .header(reqwest::header::CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(request.body.clone())
            .send()
            .map_err(|err| Error::RelayTransport(err.to_string()))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let detail = response.text().unwrap_or_default();
            let reason = status.canonical_reason().unwrap_or("unknown");
            return Err(Error::RelayStatus {
                status: status.as_u16(),
                reason: if detail.is_empty() {
                    reason.to_string()
                } else {
                    format!("{reason}: {detail}")
                },
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// The format is not one the hub understands; nothing was sent.
    UnsupportedFormat(String),
    /// The relay refused the push or could not be reached.
    Failed(String),
}

/// Sends pushes for one run under a single signed-access token.
pub struct DispatchClient<'a> {
    relay: &'a dyn PushRelay,
    endpoint: String,
    authorization: String,
}

impl<'a> DispatchClient<'a> {
    pub fn new(relay: &'a dyn PushRelay, hub_url: &str, sas: &SasToken) -> Self {
        Self {
            relay,
            endpoint: format!(
                "{}/?direct&api-version={API_VERSION}",
                hub_url.trim_end_matches('/')
            ),
            authorization: sas.header_value(),
        }
    }

    /// Relay errors are logged and reported, never raised.
    pub fn send(&self, format: &str, device_handle: &str, content: &PushContent) -> DispatchOutcome {
        let Some(push_format) = PushFormat::parse(format) else {
            tracing::warn!(%format, id = %content.id, "unsupported push format; not sending");
            return DispatchOutcome::UnsupportedFormat(format.to_string());
        };

        let request = RelayRequest {
            url: self.endpoint.clone(),
            format: push_format,
            device_handle: device_handle.to_string(),
            authorization: self.authorization.clone(),
            body: push_format.payload(content).to_string(),
        };

        match self.relay.post(&request) {
            Ok(()) => {
                tracing::info!(id = %content.id, format = push_format.as_str(), update = content.is_update, "push sent");
                DispatchOutcome::Delivered
            }
            Err(Error::RelayStatus { status, reason }) => {
                tracing::warn!(id = %content.id, status, %reason, "relay rejected push");
                DispatchOutcome::Failed(format!("{status} {reason}"))
            }
            Err(err) => {
                tracing::warn!(id = %content.id, %err, "push failed");
                DispatchOutcome::Failed(err.to_string())
            }
        }
    }
}
