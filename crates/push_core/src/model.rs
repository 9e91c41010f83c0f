use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A pending notification request as written to `requests/<backend-key>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: String,
    #[serde(rename = "creation-time", with = "chrono::serde::ts_seconds")]
    pub creation_time: DateTime<Utc>,
    #[serde(rename = "time", with = "chrono::serde::ts_seconds")]
    pub scheduled_time: DateTime<Utc>,
    pub device: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub sound: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdatePayload>,
    /// Storage identifier of the record; filled in by the loader.
    #[serde(skip)]
    pub backend_key: String,
}

impl Request {
    pub fn is_update(&self) -> bool {
        self.update.is_some()
    }

    /// Condensed projection used inside an update batch.
    pub fn update_entry(&self) -> Option<UpdateEntry> {
        self.update.as_ref().map(|update| UpdateEntry {
            id: self.id.clone(),
            kind: update.kind.clone(),
            content: update.content.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdatePayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

/// Registration record stored at `tokens/<device>.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceToken {
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub protocol: String,
}

impl DeviceToken {
    /// Stand-in for a device that has no usable registration.
    pub fn missing(device: &str) -> Self {
        Self {
            device: device.to_string(),
            ..Self::default()
        }
    }

    pub fn is_missing(&self) -> bool {
        self.token.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: serde_json::Value,
}

/// Updates collected for one device during a single run, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateBatch {
    pub device: String,
    pub entries: Vec<UpdateEntry>,
}

impl UpdateBatch {
    /// The persisted form is the bare JSON array of entries.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn request_reads_wire_field_names() {
        let raw = r#"{
            "id": "survey-1",
            "device": "d1",
            "protocol": "p1",
            "title": "Hello",
            "body": "World",
            "sound": "",
            "format": "gcm",
            "creation-time": 1600000000,
            "time": 1600000300
        }"#;
        let request: Request = serde_json::from_str(raw).unwrap();
        assert_eq!(request.id, "survey-1");
        assert_eq!(
            request.creation_time,
            Utc.timestamp_opt(1_600_000_000, 0).unwrap()
        );
        assert_eq!(
            request.scheduled_time,
            Utc.timestamp_opt(1_600_000_300, 0).unwrap()
        );
        assert!(!request.is_update());
        assert!(request.backend_key.is_empty());
    }

    #[test]
    fn update_entry_keeps_content_verbatim() {
        let raw = r#"{
            "id": "u1",
            "device": "d1",
            "creation-time": 10,
            "time": 10,
            "update": {"type": "Protocol", "content": {"property-name": "X", "value": "1"}}
        }"#;
        let request: Request = serde_json::from_str(raw).unwrap();
        let entry = request.update_entry().unwrap();
        assert_eq!(entry.kind, "Protocol");
        assert_eq!(entry.content["property-name"], "X");

        let batch = UpdateBatch {
            device: "d1".into(),
            entries: vec![entry],
        };
        let encoded: serde_json::Value = serde_json::from_slice(&batch.to_json().unwrap()).unwrap();
        assert_eq!(encoded[0]["type"], "Protocol");
        assert_eq!(encoded[0]["id"], "u1");
    }

    #[test]
    fn blank_token_counts_as_missing() {
        let token = DeviceToken {
            device: "d1".into(),
            token: "  ".into(),
            ..DeviceToken::default()
        };
        assert!(token.is_missing());
        assert!(DeviceToken::missing("d2").is_missing());
    }
}
