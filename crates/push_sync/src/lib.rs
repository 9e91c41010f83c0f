//! Remote object stores and the mirrors that keep the local copy in step.

pub mod directory;
pub mod s3;

use std::path::{Path, PathBuf};

use push_core::store::{FsStore, Mirror, ObjectStore};
use push_core::Result;

pub use crate::directory::DirectoryMirror;
pub use crate::s3::{AwsCli, S3Location, S3Mirror, S3Store};

pub const NOTIFICATIONS_DIR: &str = "push-notifications";

/// Where the shared notification area lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteBackend {
    /// `s3://{bucket}/push-notifications`. Records go through opendal and
    /// the mirror through `aws s3 sync`.
    S3 { bucket: String },
    /// A plain directory standing in for the bucket.
    Directory { path: PathBuf },
}

impl RemoteBackend {
    /// Default local mirror directory for this backend below `work_dir`.
    pub fn local_root(&self, work_dir: &Path) -> PathBuf {
        match self {
            RemoteBackend::S3 { bucket } => work_dir.join(format!("{bucket}-{NOTIFICATIONS_DIR}")),
            RemoteBackend::Directory { .. } => work_dir.join(NOTIFICATIONS_DIR),
        }
    }
}

/// Remote store plus the mirror bridging it to `local_root`.
pub struct RemoteBinding {
    pub store: Box<dyn ObjectStore>,
    pub mirror: Box<dyn Mirror>,
}

pub fn bind_remote(backend: &RemoteBackend, local_root: &Path) -> Result<RemoteBinding> {
    let binding = match backend {
        RemoteBackend::S3 { bucket } => {
            let location = S3Location::new(bucket, NOTIFICATIONS_DIR);
            tracing::debug!(remote = %location.url(""), local = %local_root.display(), "binding s3 remote");
            RemoteBinding {
                store: Box::new(S3Store::new(&location)?),
                mirror: Box::new(S3Mirror::new(AwsCli::default(), location, local_root)),
            }
        }
        RemoteBackend::Directory { path } => RemoteBinding {
            store: Box::new(FsStore::new(path)),
            mirror: Box::new(DirectoryMirror::new(local_root, path)),
        },
    };
    Ok(binding)
}
