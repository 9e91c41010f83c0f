use std::path::PathBuf;

use clap::Parser;
use push_sync::RemoteBackend;

pub const DEFAULT_LOCK_FILE: &str = "send-push-notifications.lock";

/// Sends the due push notifications from a shared outbox, then exits.
#[derive(Parser)]
#[command(name = "send_push_notifications", version)]
pub struct Cli {
    /// Bucket holding push-notifications/, without s3:// or trailing slashes
    #[arg(env = "PUSH_BUCKET", value_parser = parse_bucket)]
    pub bucket: String,

    /// Notification hub namespace
    #[arg(env = "PUSH_HUB_NAMESPACE")]
    pub hub_namespace: String,

    /// Notification hub name
    #[arg(env = "PUSH_HUB_NAME")]
    pub hub_name: String,

    /// Notification hub full access key
    #[arg(env = "PUSH_HUB_KEY", hide_env_values = true)]
    pub hub_key: String,

    /// Use this directory as the outbox instead of the bucket
    #[arg(long, env = "PUSH_REMOTE_DIR")]
    pub remote_dir: Option<PathBuf>,

    /// Directory holding the local mirror and the default lock file
    #[arg(long, env = "PUSH_WORK_DIR", default_value = ".")]
    pub work_dir: PathBuf,

    /// Lock file guarding against overlapping runs
    #[arg(long, env = "PUSH_LOCK_FILE")]
    pub lock_file: Option<PathBuf>,
}

fn parse_bucket(value: &str) -> Result<String, String> {
    let bucket = value.trim();
    if bucket.is_empty() {
        return Err("bucket must not be empty".into());
    }
    if bucket.starts_with("s3://") || bucket.ends_with('/') {
        return Err(format!("`{bucket}` must not include s3:// or trailing slashes"));
    }
    Ok(bucket.to_string())
}

/// Settings for one run of the push notification job.
#[derive(Clone, PartialEq, Eq)]
pub struct JobConfig {
    pub backend: RemoteBackend,
    pub hub_namespace: String,
    pub hub_name: String,
    pub hub_key: String,
    pub work_dir: PathBuf,
    pub lock_file: PathBuf,
}

impl std::fmt::Debug for JobConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobConfig")
            .field("backend", &self.backend)
            .field("hub_namespace", &self.hub_namespace)
            .field("hub_name", &self.hub_name)
            .field("hub_key", &"[REDACTED]")
            .field("work_dir", &self.work_dir)
            .field("lock_file", &self.lock_file)
            .finish()
    }
}

impl From<Cli> for JobConfig {
    fn from(cli: Cli) -> Self {
        let backend = match cli.remote_dir {
            Some(path) => RemoteBackend::Directory { path },
            None => RemoteBackend::S3 { bucket: cli.bucket },
        };
        let lock_file = cli
            .lock_file
            .unwrap_or_else(|| cli.work_dir.join(DEFAULT_LOCK_FILE));
        Self {
            backend,
            hub_namespace: cli.hub_namespace,
            hub_name: cli.hub_name,
            hub_key: cli.hub_key,
            work_dir: cli.work_dir,
            lock_file,
        }
    }
}

impl JobConfig {
    pub fn local_root(&self) -> PathBuf {
        self.backend.local_root(&self.work_dir)
    }
}
