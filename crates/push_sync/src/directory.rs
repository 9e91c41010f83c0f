use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use push_core::store::Mirror;
use push_core::{Error, Result};
use walkdir::WalkDir;

/// Mirrors a directory-backed remote into the local mirror directory.
///
/// Files are copied when size or modification time differ; copies carry the
/// source modification time so unchanged files are skipped on the next pass.
#[derive(Debug, Clone)]
pub struct DirectoryMirror {
    local: PathBuf,
    remote: PathBuf,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TreeSyncStats {
    pub copied: usize,
    pub deleted: usize,
}

impl DirectoryMirror {
    pub fn new(local: impl AsRef<Path>, remote: impl AsRef<Path>) -> Self {
        Self {
            local: local.as_ref().to_path_buf(),
            remote: remote.as_ref().to_path_buf(),
        }
    }
}

impl Mirror for DirectoryMirror {
    fn pull(&self) -> Result<()> {
        let stats = sync_tree(&self.remote, &self.local, true)?;
        tracing::info!(copied = stats.copied, deleted = stats.deleted, "pulled remote directory");
        Ok(())
    }

    fn push(&self, prefix: &str) -> Result<()> {
        let stats = sync_tree(&self.local.join(prefix), &self.remote.join(prefix), false)?;
        tracing::info!(%prefix, copied = stats.copied, "pushed local subtree");
        Ok(())
    }
}

/// Copies changed files from `source` to `target`; with `delete_extraneous`
/// files only present under `target` are removed.
pub fn sync_tree(source: &Path, target: &Path, delete_extraneous: bool) -> Result<TreeSyncStats> {
    let mut stats = TreeSyncStats::default();
    fs::create_dir_all(target).map_err(|err| io_error(target, err))?;

    if source.exists() {
        for entry in WalkDir::new(source) {
            let entry = entry.map_err(|err| Error::mirror(err.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|err| Error::mirror(err.to_string()))?;
            let destination = target.join(relative);
            if needs_copy(entry.path(), &destination)? {
                copy_preserving_mtime(entry.path(), &destination)?;
                stats.copied += 1;
            }
        }
    }

    if delete_extraneous {
        for entry in WalkDir::new(target).contents_first(true) {
            let entry = entry.map_err(|err| Error::mirror(err.to_string()))?;
            let relative = entry
                .path()
                .strip_prefix(target)
                .map_err(|err| Error::mirror(err.to_string()))?;
            if relative.as_os_str().is_empty() || source.join(relative).exists() {
                continue;
            }
            if entry.file_type().is_dir() {
                fs::remove_dir_all(entry.path()).map_err(|err| io_error(entry.path(), err))?;
            } else {
                fs::remove_file(entry.path()).map_err(|err| io_error(entry.path(), err))?;
                stats.deleted += 1;
            }
        }
    }

    Ok(stats)
}

fn needs_copy(source: &Path, destination: &Path) -> Result<bool> {
    let Ok(existing) = fs::metadata(destination) else {
        return Ok(true);
    };
    let incoming = fs::metadata(source).map_err(|err| io_error(source, err))?;
    Ok(existing.len() != incoming.len() || modified(&existing) != modified(&incoming))
}

fn modified(metadata: &fs::Metadata) -> Option<SystemTime> {
    metadata.modified().ok()
}

fn copy_preserving_mtime(source: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|err| io_error(parent, err))?;
    }
    fs::copy(source, destination).map_err(|err| io_error(destination, err))?;
    let stamp = fs::metadata(source)
        .and_then(|metadata| metadata.modified())
        .map_err(|err| io_error(source, err))?;
    File::options()
        .write(true)
        .open(destination)
        .and_then(|file| file.set_modified(stamp))
        .map_err(|err| io_error(destination, err))
}

fn io_error(path: &Path, err: std::io::Error) -> Error {
    Error::mirror(format!("{}: {err}", path.display()))
}
