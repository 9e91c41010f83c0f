//! S3 access: opendal for record operations, the `aws` CLI for tree sync.

use std::future::IntoFuture;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use opendal::{services, ErrorKind, Operator};
use push_core::store::{Mirror, ObjectStore};
use push_core::{Error, Result};
use tokio::runtime::Runtime;

#[derive(Debug, Clone)]
pub struct AwsCli {
    program: PathBuf,
}

impl Default for AwsCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("aws"),
        }
    }
}

impl AwsCli {
    pub fn with_program(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
        }
    }

    /// Runs `aws <args>`, feeding `stdin` when given, and returns stdout.
    pub fn run(&self, args: &[String], stdin: Option<&[u8]>) -> Result<Vec<u8>> {
        tracing::debug!(program = %self.program.display(), ?args, "invoking aws cli");
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| Error::mirror(format!("failed to start {}: {err}", self.program.display())))?;

        if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(bytes)
                .map_err(|err| Error::mirror(format!("failed to feed aws cli: {err}")))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|err| Error::mirror(format!("aws cli did not finish: {err}")))?;
        if !output.status.success() {
            return Err(Error::mirror(format!(
                "`aws {}` exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// `s3://{bucket}/{prefix}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub prefix: String,
}

impl S3Location {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    pub fn url(&self, key: &str) -> String {
        let key = key.trim_matches('/');
        match (self.prefix.is_empty(), key.is_empty()) {
            (true, true) => format!("s3://{}", self.bucket),
            (true, false) => format!("s3://{}/{key}", self.bucket),
            (false, true) => format!("s3://{}/{}", self.bucket, self.prefix),
            (false, false) => format!("s3://{}/{}/{key}", self.bucket, self.prefix),
        }
    }
}

/// Object store on an S3 bucket prefix, through an opendal operator.
///
/// The store API is blocking, so each call drives the async operator on a
/// private current-thread runtime.
pub struct S3Store {
    operator: Operator,
    runtime: Runtime,
}

impl std::fmt::Debug for S3Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Store").field("operator", &self.operator).finish()
    }
}

impl S3Store {
    /// Credentials and region come from the usual AWS environment and
    /// profile files.
    pub fn new(location: &S3Location) -> Result<Self> {
        let builder = services::S3::default()
            .bucket(&location.bucket)
            .root(&format!("/{}", location.prefix));
        let operator = Operator::new(builder)
            .map_err(|err| store_error(&location.url(""), err))?
            .finish();
        Self::from_operator(operator)
    }

    /// Wraps an already configured operator.
    pub fn from_operator(operator: Operator) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| Error::store_io("", err))?;
        Ok(Self { operator, runtime })
    }
}

fn store_error(key: &str, err: opendal::Error) -> Error {
    if err.kind() == ErrorKind::NotFound {
        return Error::NotFound(key.to_string());
    }
    Error::Store {
        key: key.to_string(),
        message: err.to_string(),
        source: Some(Box::new(err)),
    }
}

/// opendal addresses directories with a trailing slash.
fn dir_path(prefix: &str) -> String {
    format!("{}/", prefix.trim_matches('/'))
}

impl ObjectStore for S3Store {
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let listed = self
            .runtime
            .block_on(self.operator.list_with(&dir_path(prefix)).recursive(true).into_future());
        let entries = match listed {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(store_error(prefix, err)),
        };
        let mut keys: Vec<String> = entries
            .into_iter()
            .filter(|entry| entry.metadata().is_file())
            .map(|entry| entry.path().trim_start_matches('/').to_string())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.runtime
            .block_on(self.operator.read(key))
            .map(|buffer| buffer.to_vec())
            .map_err(|err| store_error(key, err))
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.runtime
            .block_on(self.operator.write(key, bytes.to_vec()))
            .map(|_| ())
            .map_err(|err| store_error(key, err))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.runtime
            .block_on(self.operator.delete(key))
            .map_err(|err| store_error(key, err))
    }

    fn delete_prefix(&self, prefix: &str) -> Result<()> {
        self.runtime
            .block_on(self.operator.remove_all(&dir_path(prefix)))
            .map_err(|err| store_error(prefix, err))
    }
}

/// `aws s3 sync` between the bucket prefix and the local mirror.
#[derive(Debug, Clone)]
pub struct S3Mirror {
    cli: AwsCli,
    location: S3Location,
    local_root: PathBuf,
}

impl S3Mirror {
    pub fn new(cli: AwsCli, location: S3Location, local_root: impl AsRef<Path>) -> Self {
        Self {
            cli,
            location,
            local_root: local_root.as_ref().to_path_buf(),
        }
    }

    /// `--exact-timestamps` is required: token files are rewritten with the
    /// same size and would otherwise be skipped.
    pub fn pull_args(&self) -> Vec<String> {
        vec![
            "s3".into(),
            "sync".into(),
            self.location.url(""),
            self.local_root.display().to_string(),
            "--delete".into(),
            "--exact-timestamps".into(),
        ]
    }

    pub fn push_args(&self, prefix: &str) -> Vec<String> {
        vec![
            "s3".into(),
            "sync".into(),
            self.local_root.join(prefix).display().to_string(),
            self.location.url(prefix),
        ]
    }
}

impl Mirror for S3Mirror {
    fn pull(&self) -> Result<()> {
        std::fs::create_dir_all(&self.local_root)
            .map_err(|err| Error::mirror(format!("{}: {err}", self.local_root.display())))?;
        self.cli.run(&self.pull_args(), None)?;
        tracing::info!(remote = %self.location.url(""), "pulled remote store");
        Ok(())
    }

    fn push(&self, prefix: &str) -> Result<()> {
        self.cli.run(&self.push_args(prefix), None)?;
        tracing::info!(remote = %self.location.url(prefix), "pushed local subtree");
        Ok(())
    }
}
