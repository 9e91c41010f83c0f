//! Removal of records from both the local mirror and the remote store.

use crate::store::ObjectStore;

/// Deletes records on both sides, logging failures instead of raising them.
///
/// The two deletes are independent; a failure on one side leaves the other
/// side's result in place and the next mirror pull reconciles the drift.
pub struct Cleanup<'a> {
    local: &'a dyn ObjectStore,
    remote: &'a dyn ObjectStore,
    failures: usize,
}

impl<'a> Cleanup<'a> {
    pub fn new(local: &'a dyn ObjectStore, remote: &'a dyn ObjectStore) -> Self {
        Self {
            local,
            remote,
            failures: 0,
        }
    }

    pub fn remove_record(&mut self, key: &str, reason: &'static str) {
        tracing::debug!(%key, reason, "deleting record");
        let local = self.local.delete(key);
        let remote = self.remote.delete(key);
        self.settle(key, local, remote)
    }

    pub fn remove_tree(&mut self, prefix: &str, reason: &'static str) {
        tracing::debug!(%prefix, reason, "deleting record tree");
        let local = self.local.delete_prefix(prefix);
        let remote = self.remote.delete_prefix(prefix);
        self.settle(prefix, local, remote)
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    fn settle(&mut self, key: &str, local: crate::Result<()>, remote: crate::Result<()>) {
        let mut ok = true;
        if let Err(err) = local {
            tracing::warn!(%key, %err, "local delete failed");
            ok = false;
        }
        if let Err(err) = remote {
            tracing::warn!(%key, %err, "remote delete failed");
            ok = false;
        }
        if !ok {
            self.failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsStore;
    use tempfile::tempdir;

    #[test]
    fn removes_from_both_sides() {
        let local_dir = tempdir().unwrap();
        let remote_dir = tempdir().unwrap();
        let local = FsStore::new(local_dir.path());
        let remote = FsStore::new(remote_dir.path());
        for store in [&local, &remote] {
            store.write("requests/a.json", b"{}").unwrap();
            store.write("updates/d1/b.json", b"[]").unwrap();
        }

        let mut cleanup = Cleanup::new(&local, &remote);
        cleanup.remove_record("requests/a.json", "test");
        cleanup.remove_tree("updates/d1", "test");
        assert_eq!(cleanup.failures(), 0);

        for store in [&local, &remote] {
            assert!(store.list("requests").unwrap().is_empty());
            assert!(store.list("updates").unwrap().is_empty());
        }
    }
}
