//! Error types shared by the reconciliation engine and its collaborators.

/// The result type used throughout `push_core`.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A storage backend operation failed.
    #[error("storage error on `{key}`: {message}")]
    Store {
        key: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The requested record does not exist.
    #[error("no record at `{0}`")]
    NotFound(String),

    /// A record could not be encoded or decoded.
    #[error("malformed record `{key}`: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The push relay rejected the request.
    #[error("relay responded {status}: {reason}")]
    RelayStatus { status: u16, reason: String },

    /// The push relay could not be reached.
    #[error("relay transport failure: {0}")]
    RelayTransport(String),

    /// The relay credential could not be produced.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Mirror synchronization failed.
    #[error("mirror sync failed: {0}")]
    Mirror(String),
}

impl Error {
    pub fn store(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            key: key.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Maps `io::ErrorKind::NotFound` to [`Error::NotFound`]; everything
    /// else is a storage failure.
    pub fn store_io(key: impl Into<String>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound(key.into());
        }
        Self::Store {
            key: key.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn json(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            key: key.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn mirror(message: impl Into<String>) -> Self {
        Self::Mirror(message.into())
    }
}
