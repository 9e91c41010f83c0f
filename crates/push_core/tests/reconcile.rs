use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use push_core::dispatch::{PushRelay, RelayRequest};
use push_core::model::UpdateEntry;
use push_core::store::{FsStore, Mirror, ObjectStore};
use push_core::{Error, Reconciler, RunReport};
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};

const HUB_URL: &str = "https://ns.servicebus.windows.net/hub/messages";

#[derive(Clone, Default)]
struct RecordingRelay {
    sent: Arc<Mutex<Vec<RelayRequest>>>,
    fail: bool,
}

impl PushRelay for RecordingRelay {
    fn post(&self, request: &RelayRequest) -> push_core::Result<()> {
        self.sent.lock().push(request.clone());
        if self.fail {
            return Err(Error::RelayStatus {
                status: 503,
                reason: "Service Unavailable".into(),
            });
        }
        Ok(())
    }
}

/// Local store whose reads of the listed keys fail with an I/O error.
struct FlakyStore {
    inner: FsStore,
    failing: Vec<&'static str>,
}

impl ObjectStore for FlakyStore {
    fn list(&self, prefix: &str) -> push_core::Result<Vec<String>> {
        self.inner.list(prefix)
    }

    fn read(&self, key: &str) -> push_core::Result<Vec<u8>> {
        if self.failing.contains(&key) {
            return Err(Error::store(key, "EIO"));
        }
        self.inner.read(key)
    }

    fn write(&self, key: &str, bytes: &[u8]) -> push_core::Result<()> {
        self.inner.write(key, bytes)
    }

    fn delete(&self, key: &str) -> push_core::Result<()> {
        self.inner.delete(key)
    }

    fn delete_prefix(&self, prefix: &str) -> push_core::Result<()> {
        self.inner.delete_prefix(prefix)
    }
}

/// What the mirror does besides uploading when `updates/` is pushed.
#[derive(Clone, Copy)]
enum OnPush {
    Upload,
    /// Upload, then withdraw the device's token from the local mirror.
    RevokeToken(&'static str),
    /// Upload nothing and fail.
    Fail,
}

/// Copies records between two directory stores through the store API.
struct CopyMirror {
    local: FsStore,
    remote: FsStore,
    pushes: Arc<Mutex<Vec<String>>>,
    on_push: OnPush,
}

impl Mirror for CopyMirror {
    fn pull(&self) -> push_core::Result<()> {
        let remote_keys = self.remote.list("")?;
        for key in self.local.list("")? {
            if !remote_keys.contains(&key) {
                self.local.delete(&key)?;
            }
        }
        for key in remote_keys {
            self.local.write(&key, &self.remote.read(&key)?)?;
        }
        Ok(())
    }

    fn push(&self, prefix: &str) -> push_core::Result<()> {
        if let OnPush::Fail = self.on_push {
            return Err(Error::mirror("upload refused"));
        }
        for key in self.local.list(prefix)? {
            self.remote.write(&key, &self.local.read(&key)?)?;
        }
        self.pushes.lock().push(prefix.to_string());
        if let OnPush::RevokeToken(device) = self.on_push {
            self.local.delete(&format!("tokens/{device}.json"))?;
        }
        Ok(())
    }
}

struct Harness {
    _local_dir: TempDir,
    _remote_dir: TempDir,
    local: FsStore,
    remote: FsStore,
    relay: RecordingRelay,
    pushes: Arc<Mutex<Vec<String>>>,
    failing_reads: Vec<&'static str>,
}

impl Harness {
    fn new() -> Self {
        let local_dir = tempdir().expect("local tempdir");
        let remote_dir = tempdir().expect("remote tempdir");
        Self {
            local: FsStore::new(local_dir.path()),
            remote: FsStore::new(remote_dir.path()),
            _local_dir: local_dir,
            _remote_dir: remote_dir,
            relay: RecordingRelay::default(),
            pushes: Arc::default(),
            failing_reads: Vec::new(),
        }
    }

    fn put(&self, key: &str, value: &Value) {
        self.remote
            .write(key, value.to_string().as_bytes())
            .expect("write remote fixture");
    }

    fn put_token(&self, device: &str, format: &str) {
        self.put(
            &format!("tokens/{device}.json"),
            &json!({"device": device, "token": format!("{device}-handle"), "format": format, "protocol": "proto-1"}),
        );
    }

    fn reconciler(&self, on_push: OnPush) -> Reconciler {
        Reconciler::builder()
            .local_store(Box::new(FlakyStore {
                inner: self.local.clone(),
                failing: self.failing_reads.clone(),
            }))
            .remote_store(Box::new(self.remote.clone()))
            .mirror(Box::new(CopyMirror {
                local: self.local.clone(),
                remote: self.remote.clone(),
                pushes: self.pushes.clone(),
                on_push,
            }))
            .relay(Box::new(self.relay.clone()))
            .hub(HUB_URL, "secret")
            .build()
            .expect("build reconciler")
    }

    fn run(&self) -> RunReport {
        self.reconciler(OnPush::Upload).run_at(now()).expect("run")
    }

    fn exists_everywhere(&self, key: &str) -> bool {
        self.local.path_for(key).exists() && self.remote.path_for(key).exists()
    }

    fn gone_everywhere(&self, key: &str) -> bool {
        !self.local.path_for(key).exists() && !self.remote.path_for(key).exists()
    }

    fn sent_bodies(&self) -> Vec<Value> {
        self.relay
            .sent
            .lock()
            .iter()
            .map(|request| serde_json::from_str(&request.body).expect("json body"))
            .collect()
    }
}

fn now() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

fn request(id: &str, device: &str, created: i64, scheduled: DateTime<Utc>) -> Value {
    json!({
        "id": id,
        "device": device,
        "format": "gcm",
        "protocol": "proto-1",
        "title": "Survey",
        "body": "Please respond",
        "sound": "",
        "creation-time": created,
        "time": scheduled.timestamp(),
    })
}

fn update_request(id: &str, device: &str, created: i64, content: &str) -> Value {
    let mut value = request(id, device, created, now());
    value["update"] = json!({"type": "SurveyAgentPolicy", "content": content});
    value
}

#[test]
fn newest_duplicate_is_pushed_and_older_copy_deleted() {
    let harness = Harness::new();
    harness.put_token("d1", "gcm");
    harness.put("requests/old-copy.json", &request("abc", "d1", 100, now()));
    harness.put("requests/new-copy.json", &request("abc", "d1", 200, now()));

    let report = harness.run();

    assert_eq!(report.loaded, 2);
    assert_eq!(report.obsolete, 1);
    assert_eq!(report.pushed, 1);
    assert!(harness.gone_everywhere("requests/old-copy.json"));
    assert!(harness.exists_everywhere("requests/new-copy.json"));

    let bodies = harness.sent_bodies();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["data"]["backend-key"], "new-copy");
    assert_eq!(bodies[0]["data"]["update"], "false");
    assert_eq!(harness.relay.sent.lock()[0].device_handle, "d1-handle");
}

#[test]
fn updates_are_coalesced_newest_first() {
    let harness = Harness::new();
    harness.put_token("d1", "apple");
    harness.put("requests/c.json", &update_request("u-c", "d1", 100, "C"));
    harness.put("requests/a.json", &update_request("u-a", "d1", 300, "A"));
    harness.put("requests/b.json", &update_request("u-b", "d1", 200, "B"));

    let report = harness.run();

    assert_eq!(report.coalesced, 3);
    assert_eq!(report.batches_written, 1);
    assert_eq!(report.batches_pushed, 1);
    for key in ["requests/a.json", "requests/b.json", "requests/c.json"] {
        assert!(harness.gone_everywhere(key), "{key} should be deleted");
    }

    let batch_keys = harness.remote.list("updates/d1").expect("list remote updates");
    assert_eq!(batch_keys.len(), 1, "batch must reach the remote store");
    let entries: Vec<UpdateEntry> =
        serde_json::from_slice(&harness.remote.read(&batch_keys[0]).expect("read batch"))
            .expect("decode batch");
    let contents: Vec<&str> = entries
        .iter()
        .map(|entry| entry.content.as_str().unwrap_or_default())
        .collect();
    assert_eq!(contents, vec!["A", "B", "C"]);
    assert_eq!(*harness.pushes.lock(), vec!["updates".to_string()]);

    let bodies = harness.sent_bodies();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["update"], "true");
    assert_eq!(bodies[0]["backend-key"], "");
    assert_eq!(bodies[0]["protocol"], "proto-1");
    assert_ne!(bodies[0]["id"], "u-a");
    assert_eq!(bodies[0]["aps"]["content-available"], 1);
}

#[test]
fn expired_requests_are_deleted_without_token() {
    let harness = Harness::new();
    let scheduled = now() - Duration::hours(24) + Duration::minutes(6);
    harness.put("requests/late.json", &request("late", "nobody", 1, scheduled));

    let report = harness.run();

    assert_eq!(report.expired, 1);
    assert!(harness.gone_everywhere("requests/late.json"));
    assert!(harness.relay.sent.lock().is_empty());
}

#[test]
fn future_requests_are_left_untouched() {
    let harness = Harness::new();
    harness.put_token("d1", "gcm");
    let scheduled = now() + Duration::minutes(10);
    harness.put("requests/later.json", &request("later", "d1", 1, scheduled));
    harness.put("requests/later-update.json", &{
        let mut value = update_request("later-update", "d1", 1, "X");
        value["time"] = json!(scheduled.timestamp());
        value
    });

    let report = harness.run();

    assert_eq!(report.deferred, 2);
    assert!(harness.exists_everywhere("requests/later.json"));
    assert!(harness.exists_everywhere("requests/later-update.json"));
    assert!(harness.relay.sent.lock().is_empty());
    assert!(harness.local.list("updates").expect("list updates").is_empty());
    assert!(harness.pushes.lock().is_empty());
}

#[test]
fn requests_without_token_are_stale() {
    let harness = Harness::new();
    harness.put("requests/orphan.json", &request("orphan", "ghost", 1, now()));
    harness.put("requests/orphan-update.json", &update_request("orphan-update", "ghost", 2, "X"));

    let report = harness.run();

    assert_eq!(report.stale, 2);
    assert!(harness.gone_everywhere("requests/orphan.json"));
    assert!(harness.gone_everywhere("requests/orphan-update.json"));
    assert!(harness.relay.sent.lock().is_empty());
    assert!(harness.local.list("updates").expect("list updates").is_empty());
}

#[test]
fn relay_failure_keeps_immediate_request() {
    let mut harness = Harness::new();
    harness.relay.fail = true;
    harness.put_token("d1", "gcm");
    harness.put("requests/retry-me.json", &request("retry", "d1", 1, now()));

    let report = harness.run();

    assert_eq!(report.push_failures, 1);
    assert_eq!(report.pushed, 0);
    assert!(harness.exists_everywhere("requests/retry-me.json"));
}

#[test]
fn unsupported_format_is_not_sent() {
    let harness = Harness::new();
    harness.put_token("d1", "gcm");
    let mut value = request("odd", "d1", 1, now());
    value["format"] = json!("");
    harness.put("requests/odd.json", &value);

    let report = harness.run();

    assert_eq!(report.unsupported, 1);
    assert!(harness.relay.sent.lock().is_empty());
    assert!(harness.exists_everywhere("requests/odd.json"));
}

#[test]
fn corrupt_records_are_removed_from_both_sides() {
    let harness = Harness::new();
    harness.remote.write("requests/empty.json", b"").expect("write empty");
    harness.remote.write("requests/garbled.json", b"{\"id\"").expect("write garbled");

    let report = harness.run();

    assert_eq!(report.corrupt, 2);
    assert_eq!(report.loaded, 0);
    assert!(harness.gone_everywhere("requests/empty.json"));
    assert!(harness.gone_everywhere("requests/garbled.json"));
}

#[test]
fn batch_is_discarded_when_token_disappears_before_dispatch() {
    let harness = Harness::new();
    harness.put_token("d1", "gcm");
    harness.put("requests/u.json", &update_request("u", "d1", 1, "A"));

    let report = harness
        .reconciler(OnPush::RevokeToken("d1"))
        .run_at(now())
        .expect("run");

    assert_eq!(report.coalesced, 1);
    assert_eq!(report.batches_written, 1);
    assert_eq!(report.batches_discarded, 1);
    assert_eq!(report.batches_pushed, 0);
    assert!(harness.relay.sent.lock().is_empty());
    assert!(harness.gone_everywhere("updates/d1"));
    assert!(harness.gone_everywhere("requests/u.json"));
}

#[test]
fn mixed_outbox_routes_each_request() {
    let harness = Harness::new();
    harness.put_token("d1", "gcm");
    harness.put_token("d2", "apple");
    harness.put("requests/push.json", &request("push", "d1", 10, now()));
    harness.put("requests/u1.json", &update_request("u1", "d1", 20, "one"));
    harness.put("requests/u2.json", &update_request("u2", "d2", 30, "two"));

    let report = harness.run();

    assert_eq!(report.pushed, 1);
    assert_eq!(report.coalesced, 2);
    assert_eq!(report.batches_pushed, 2);
    assert_eq!(harness.relay.sent.lock().len(), 3);
    assert!(harness.exists_everywhere("requests/push.json"));
    assert_eq!(harness.remote.list("updates").expect("list").len(), 2);
}

#[test]
fn batch_push_failure_keeps_uploaded_batch() {
    let mut harness = Harness::new();
    harness.relay.fail = true;
    harness.put_token("d1", "gcm");
    harness.put("requests/u.json", &update_request("u", "d1", 1, "A"));

    let report = harness.run();

    assert_eq!(report.coalesced, 1);
    assert_eq!(report.batches_written, 1);
    assert_eq!(report.batches_pushed, 0);
    assert_eq!(report.push_failures, 1);
    assert_eq!(harness.relay.sent.lock().len(), 1);
    assert!(harness.gone_everywhere("requests/u.json"));
    assert_eq!(harness.remote.list("updates/d1").expect("list").len(), 1);
    assert_eq!(harness.local.list("updates/d1").expect("list").len(), 1);
}

#[test]
fn failed_upload_aborts_after_sources_are_deleted() {
    let harness = Harness::new();
    harness.put_token("d1", "gcm");
    harness.put("requests/u.json", &update_request("u", "d1", 1, "A"));

    let err = harness
        .reconciler(OnPush::Fail)
        .run_at(now())
        .expect_err("upload failure aborts the run");

    assert!(matches!(err, Error::Mirror(_)), "{err}");
    assert!(harness.gone_everywhere("requests/u.json"));
    assert_eq!(harness.local.list("updates/d1").expect("list").len(), 1);
    assert!(harness.remote.list("updates").expect("list").is_empty());
    assert!(harness.relay.sent.lock().is_empty());
}

#[test]
fn unreadable_records_are_kept_for_the_next_run() {
    let mut harness = Harness::new();
    harness.failing_reads = vec!["requests/flaky.json", "tokens/d2.json"];
    harness.put_token("d1", "gcm");
    harness.put_token("d2", "gcm");
    harness.put("requests/flaky.json", &request("flaky", "d1", 1, now()));
    harness.put("requests/for-d2.json", &request("for-d2", "d2", 2, now()));
    harness.put("requests/update-d2.json", &update_request("update-d2", "d2", 3, "X"));

    let report = harness.run();

    assert_eq!(report.unreadable, 1);
    assert_eq!(report.loaded, 2);
    assert_eq!(report.token_errors, 2);
    assert_eq!(report.stale, 0);
    assert_eq!(report.corrupt, 0);
    assert!(harness.relay.sent.lock().is_empty());
    for key in ["requests/flaky.json", "requests/for-d2.json", "requests/update-d2.json"] {
        assert!(harness.exists_everywhere(key), "{key} should be kept");
    }
}

#[test]
fn unreadable_token_at_batch_time_keeps_the_batch() {
    let harness = Harness::new();
    harness.put_token("d1", "gcm");
    harness.put("requests/u.json", &update_request("u", "d1", 1, "A"));
    let reconciler = Reconciler::builder()
        .local_store(Box::new(TokenFailsAfterPush {
            inner: harness.local.clone(),
            pushes: harness.pushes.clone(),
        }))
        .remote_store(Box::new(harness.remote.clone()))
        .mirror(Box::new(CopyMirror {
            local: harness.local.clone(),
            remote: harness.remote.clone(),
            pushes: harness.pushes.clone(),
            on_push: OnPush::Upload,
        }))
        .relay(Box::new(harness.relay.clone()))
        .hub(HUB_URL, "secret")
        .build()
        .expect("build reconciler");

    let report = reconciler.run_at(now()).expect("run");

    assert_eq!(report.coalesced, 1);
    assert_eq!(report.token_errors, 1);
    assert_eq!(report.batches_discarded, 0);
    assert_eq!(report.batches_pushed, 0);
    assert!(harness.relay.sent.lock().is_empty());
    assert_eq!(harness.remote.list("updates/d1").expect("list").len(), 1);
}

/// Token reads start failing once the mirror has uploaded `updates/`.
struct TokenFailsAfterPush {
    inner: FsStore,
    pushes: Arc<Mutex<Vec<String>>>,
}

impl ObjectStore for TokenFailsAfterPush {
    fn list(&self, prefix: &str) -> push_core::Result<Vec<String>> {
        self.inner.list(prefix)
    }

    fn read(&self, key: &str) -> push_core::Result<Vec<u8>> {
        if key.starts_with("tokens/") && !self.pushes.lock().is_empty() {
            return Err(Error::store(key, "EIO"));
        }
        self.inner.read(key)
    }

    fn write(&self, key: &str, bytes: &[u8]) -> push_core::Result<()> {
        self.inner.write(key, bytes)
    }

    fn delete(&self, key: &str) -> push_core::Result<()> {
        self.inner.delete(key)
    }

    fn delete_prefix(&self, prefix: &str) -> push_core::Result<()> {
        self.inner.delete_prefix(prefix)
    }
}
