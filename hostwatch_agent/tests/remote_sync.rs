//! Merge-sync behaviour against in-process object stores.
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Local, TimeZone};
use hostwatch_agent::chunk::{Chunk, ChunkStore};
use hostwatch_agent::csv;
use hostwatch_agent::remote::{MemoryStore, ObjectStore, StoreError};
use hostwatch_agent::sync::{RemoteSynchronizer, SyncError, SyncOutcome};
use hostwatch_agent::types::{ChunkKind, HardwareSample, HostIdentity, Record, Timestamp};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const HOST: HostIdentity = HostIdentity(220_000_000_001);

fn t0() -> Timestamp {
    Local.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap()
}

fn hw(ts: &str, cpu: f64) -> HardwareSample {
    HardwareSample {
        capture_time: ts.into(),
        cpu_percent: cpu,
        ram_percent: 40.0,
        disk_percent: 60.0,
        process_count: 200,
        host_identity: HOST,
        host_model: "totem-a".into(),
        owner_id: 3,
    }
}

fn remote_doc(rows: &[HardwareSample]) -> Bytes {
    let mut s = csv::encode_row(HardwareSample::HEADER);
    for r in rows {
        s.push_str(&csv::encode_row(&r.fields()));
    }
    Bytes::from(s)
}

fn remote_table(store: &MemoryStore, key: &str) -> csv::Table {
    let body = store.object(key).expect("remote object");
    csv::parse(std::str::from_utf8(&body).unwrap()).unwrap()
}

fn cpu_by_time(t: &csv::Table) -> Vec<(String, String)> {
    t.rows.iter().map(|r| (r[0].clone(), r[1].clone())).collect()
}

fn setup() -> (tempfile::TempDir, ChunkStore, Arc<MemoryStore>, RemoteSynchronizer) {
    let td = tempfile::tempdir().unwrap();
    let chunks = ChunkStore::open(td.path(), HOST, Duration::from_secs(300), t0()).unwrap();
    let store = Arc::new(MemoryStore::new());
    let sync = RemoteSynchronizer::new(store.clone(), HOST);
    (td, chunks, store, sync)
}

fn hardware(chunks: &ChunkStore) -> &Chunk {
    chunks.chunk(ChunkKind::Hardware)
}

#[tokio::test]
async fn empty_chunk_against_missing_remote_uploads_verbatim() {
    let (_td, mut chunks, store, sync) = setup();
    chunks.append::<HardwareSample>(&[]).unwrap();
    let outcome = sync.sync(hardware(&chunks)).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Created { rows: 0 });

    let local = std::fs::read(&hardware(&chunks).local_path).unwrap();
    let key = format!("registros/{HOST}/dados.csv");
    assert_eq!(store.object(&key).unwrap(), Bytes::from(local));
}

#[tokio::test]
async fn later_row_wins_on_duplicate_key() {
    let (_td, mut chunks, store, sync) = setup();
    let key = hardware(&chunks).remote_key.clone();
    store.insert(&key, remote_doc(&[hw("t0", 10.0)]));

    chunks.append(&[hw("t0", 90.0)]).unwrap();
    let outcome = sync.sync(hardware(&chunks)).await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Merged {
            remote_rows: 1,
            local_rows: 1,
            merged_rows: 1
        }
    );
    assert_eq!(
        cpu_by_time(&remote_table(&store, &key)),
        vec![("t0".to_string(), "90".to_string())]
    );
}

#[tokio::test]
async fn repeated_syncs_converge_to_deduplicated_union() {
    let (_td, mut chunks, store, sync) = setup();
    let key = hardware(&chunks).remote_key.clone();
    // rows left by a previous run of this host
    store.insert(&key, remote_doc(&[hw("r1", 1.0), hw("t1", 2.0)]));

    chunks.append(&[hw("t1", 3.0), hw("t2", 4.0)]).unwrap();
    sync.sync(hardware(&chunks)).await.unwrap();
    sync.sync(hardware(&chunks)).await.unwrap();

    chunks.append(&[hw("t3", 5.0)]).unwrap();
    sync.sync(hardware(&chunks)).await.unwrap();
    let first = store.object(&key).unwrap();
    sync.sync(hardware(&chunks)).await.unwrap();
    assert_eq!(store.object(&key).unwrap(), first, "re-sync changed remote");

    let pairs: Vec<(String, String)> = [("r1", "1"), ("t1", "3"), ("t2", "4"), ("t3", "5")]
        .iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect();
    assert_eq!(cpu_by_time(&remote_table(&store, &key)), pairs);
}

#[tokio::test]
async fn duplicate_keys_inside_the_local_file_are_collapsed_on_first_upload() {
    let (_td, mut chunks, store, sync) = setup();
    chunks.append(&[hw("t0", 10.0), hw("t0", 90.0)]).unwrap();
    let outcome = sync.sync(hardware(&chunks)).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Created { rows: 1 });
    let key = hardware(&chunks).remote_key.clone();
    assert_eq!(
        cpu_by_time(&remote_table(&store, &key)),
        vec![("t0".to_string(), "90".to_string())]
    );
}

#[tokio::test]
async fn prefix_marker_created_once() {
    let (_td, mut chunks, store, sync) = setup();
    chunks.append(&[hw("t0", 1.0)]).unwrap();
    sync.sync(hardware(&chunks)).await.unwrap();
    sync.sync(hardware(&chunks)).await.unwrap();
    let marker = format!("registros/{HOST}/");
    assert_eq!(store.object(&marker), Some(Bytes::new()));
    assert_eq!(
        store.keys(),
        vec![marker.clone(), format!("{marker}dados.csv")]
    );
}

/// Store whose reads or listings can be made to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_get: AtomicBool,
    fail_list: AtomicBool,
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn count_prefix(&self, prefix: &str, limit: i32) -> Result<usize, StoreError> {
        if self.fail_list.load(Ordering::Relaxed) {
            return Err(StoreError::other("list", prefix, "access denied"));
        }
        self.inner.count_prefix(prefix, limit).await
    }
    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        if self.fail_get.load(Ordering::Relaxed) {
            return Err(StoreError::other("get", key, "connection reset"));
        }
        self.inner.get(key).await
    }
    async fn put(&self, key: &str, body: Bytes) -> Result<(), StoreError> {
        self.inner.put(key, body).await
    }
}

#[tokio::test]
async fn other_fetch_failures_surface_and_leave_local_intact() {
    let td = tempfile::tempdir().unwrap();
    let mut chunks = ChunkStore::open(td.path(), HOST, Duration::from_secs(300), t0()).unwrap();
    let store = Arc::new(FlakyStore::default());
    store.fail_get.store(true, Ordering::Relaxed);
    let sync = RemoteSynchronizer::new(store.clone(), HOST);

    chunks.append(&[hw("t0", 1.0)]).unwrap();
    let before = std::fs::read(&hardware(&chunks).local_path).unwrap();
    let err = sync.sync(hardware(&chunks)).await.unwrap_err();
    assert!(matches!(err, SyncError::Store(StoreError::Other { .. })), "{err}");
    assert_eq!(std::fs::read(&hardware(&chunks).local_path).unwrap(), before);
    assert!(store.inner.object(&hardware(&chunks).remote_key).is_none());

    // next tick: store healthy again
    store.fail_get.store(false, Ordering::Relaxed);
    let outcome = sync.sync(hardware(&chunks)).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Created { rows: 1 });
}

#[tokio::test]
async fn listing_failure_is_not_fatal() {
    let td = tempfile::tempdir().unwrap();
    let mut chunks = ChunkStore::open(td.path(), HOST, Duration::from_secs(300), t0()).unwrap();
    let store = Arc::new(FlakyStore::default());
    store.fail_list.store(true, Ordering::Relaxed);
    let sync = RemoteSynchronizer::new(store.clone(), HOST);

    chunks.append(&[hw("t0", 1.0)]).unwrap();
    sync.sync(hardware(&chunks)).await.unwrap();
    assert!(store.inner.object(&hardware(&chunks).remote_key).is_some());
    assert!(store.inner.object(&format!("registros/{HOST}/")).is_none());
}

#[tokio::test]
async fn malformed_remote_is_a_sync_failure() {
    let (_td, mut chunks, store, sync) = setup();
    let key = hardware(&chunks).remote_key.clone();
    store.insert(&key, Bytes::from_static(b"capture_time,host_identity\n\"broken\n"));
    chunks.append(&[hw("t0", 1.0)]).unwrap();
    let err = sync.sync(hardware(&chunks)).await.unwrap_err();
    assert!(matches!(err, SyncError::Malformed { which: "remote", .. }), "{err}");
    // the bad object is left untouched for inspection
    assert_eq!(
        store.object(&key).unwrap(),
        Bytes::from_static(b"capture_time,host_identity\n\"broken\n")
    );
}

#[tokio::test]
async fn missing_local_file_is_reported() {
    let (_td, chunks, _store, sync) = setup();
    let err = sync.sync(hardware(&chunks)).await.unwrap_err();
    assert!(matches!(err, SyncError::Local { .. }));
}
