use super::*;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn temp_store() -> (TempDir, StateStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::at(dir.path().join("process_state.json")).unwrap();
    (dir, store)
}

#[test]
fn test_open_creates_empty_file() {
    let (_dir, store) = temp_store();
    assert!(store.path().exists());
    let state = store.load().unwrap();
    assert_eq!(state.version, CURRENT_SCHEMA_VERSION);
    assert!(state.records.is_empty());
}

#[test]
fn test_record_launch_supersedes_previous_pid() {
    let (_dir, store) = temp_store();
    let t0 = Utc::now();

    store.record_launch(4100, "editor", "Editor", ProcessStatus::Launching, t0).unwrap();
    store
        .record_launch(4200, "editor", "Editor", ProcessStatus::Launching, t0 + ChronoDuration::seconds(30))
        .unwrap();

    let state = store.load().unwrap();
    assert_eq!(state.records.len(), 2);
    assert_eq!(state.get(4100).unwrap().superseded_by, Some(4200));
    assert!(state.get(4200).unwrap().is_current());

    let (pid, record) = store.latest_for_spec("editor").unwrap().unwrap();
    assert_eq!(pid, 4200);
    assert_eq!(record.name, "Editor");
}

#[test]
fn test_latest_for_spec_ignores_other_specs() {
    let (_dir, store) = temp_store();
    let now = Utc::now();
    store.record_launch(10, "viewer", "Viewer", ProcessStatus::Running, now).unwrap();

    assert!(store.latest_for_spec("editor").unwrap().is_none());
    assert_eq!(store.latest_for_spec("viewer").unwrap().map(|(pid, _)| pid), Some(10));
}

#[test]
fn test_set_status() {
    let (_dir, store) = temp_store();
    store.record_launch(77, "editor", "Editor", ProcessStatus::Launching, Utc::now()).unwrap();

    assert!(store.set_status(77, ProcessStatus::Running).unwrap());
    assert_eq!(store.get(77).unwrap().unwrap().status, ProcessStatus::Running);
    assert!(!store.set_status(78, ProcessStatus::Running).unwrap());
}

#[test]
fn test_hung_since_is_edge_triggered() {
    let (_dir, store) = temp_store();
    let t0 = Utc::now();
    store.record_launch(55, "editor", "Editor", ProcessStatus::Running, t0).unwrap();

    let t1 = t0 + ChronoDuration::seconds(90);
    let edge = store.record_probe(55, false, t1).unwrap();
    assert_eq!(edge, Some(ProbeTransition::BecameUnresponsive));
    assert_eq!(store.get(55).unwrap().unwrap().hung_since, Some(t1));

    let t2 = t1 + ChronoDuration::seconds(10);
    assert_eq!(store.record_probe(55, false, t2).unwrap(), None);
    let record = store.get(55).unwrap().unwrap();
    assert_eq!(record.hung_since, Some(t1));
    assert_eq!(record.last_probe, Some(t2));

    let t3 = t2 + ChronoDuration::seconds(10);
    assert_eq!(
        store.record_probe(55, true, t3).unwrap(),
        Some(ProbeTransition::BecameResponsive)
    );
    let record = store.get(55).unwrap().unwrap();
    assert!(record.responsive);
    assert_eq!(record.hung_since, None);
}

#[test]
fn test_record_probe_unknown_pid() {
    let (_dir, store) = temp_store();
    assert_eq!(store.record_probe(999, false, Utc::now()).unwrap(), None);
    assert!(store.load().unwrap().records.is_empty());
}

#[test]
fn test_compact_keeps_current_records() {
    let (_dir, store) = temp_store();
    let old = Utc::now() - ChronoDuration::days(30);
    store.record_launch(1, "editor", "Editor", ProcessStatus::Running, old).unwrap();
    store.record_launch(2, "editor", "Editor", ProcessStatus::Running, old).unwrap();
    store.record_launch(3, "viewer", "Viewer", ProcessStatus::Running, old).unwrap();

    let removed = store.compact(ChronoDuration::days(7), Utc::now()).unwrap();
    assert_eq!(removed, 1);

    let state = store.load().unwrap();
    assert!(state.get(1).is_none());
    assert!(state.get(2).is_some());
    assert!(state.get(3).is_some());
}

#[test]
fn test_corrupt_file_is_set_aside() {
    let (dir, store) = temp_store();
    std::fs::write(store.path(), b"{ not json").unwrap();

    let state = store.load().unwrap();
    assert!(state.records.is_empty());
    assert!(dir.path().join("process_state.corrupt").exists());
}

#[test]
fn test_newer_schema_is_rejected() {
    let (_dir, store) = temp_store();
    std::fs::write(store.path(), br#"{"version": 99, "records": {}}"#).unwrap();
    assert!(store.load().is_err());
}

#[test]
fn test_no_temp_file_left_behind() {
    let (dir, store) = temp_store();
    store.record_launch(5, "editor", "Editor", ProcessStatus::Running, Utc::now()).unwrap();
    assert!(!dir.path().join("process_state.json.tmp").exists());
}

#[test]
fn test_concurrent_writers_do_not_lose_updates() {
    let dir = tempfile::tempdir().unwrap();
    let path = Arc::new(dir.path().join("process_state.json"));
    StateStore::at(path.as_ref()).unwrap();

    let handles: Vec<_> = (0..8u32)
        .map(|worker| {
            let path = path.clone();
            std::thread::spawn(move || {
                let store = StateStore::open(StorageConfig {
                    path: path.as_ref().clone(),
                    lock_attempts: 200,
                    lock_retry_base: Duration::from_millis(1),
                })
                .unwrap();
                for i in 0..20u32 {
                    let pid = worker * 1000 + i;
                    store
                        .record_launch(pid, &format!("spec-{}-{}", worker, i), "proc", ProcessStatus::Running, Utc::now())
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let store = StateStore::at(path.as_ref()).unwrap();
    assert_eq!(store.load().unwrap().records.len(), 160);
}

#[test]
fn test_contended_lock_gives_up() {
    let (_dir, store) = temp_store();
    let config = StorageConfig {
        path: store.path().to_path_buf(),
        lock_attempts: 3,
        lock_retry_base: Duration::from_millis(1),
    };
    let _held = lock::StoreLock::acquire(&config.lock_path(), 1, Duration::from_millis(1)).unwrap();

    let contender = StateStore { config };
    match contender.load() {
        Err(TetherError::StoreLocked { attempts }) => assert_eq!(attempts, 3),
        other => panic!("expected StoreLocked, got {:?}", other.map(|s| s.records.len())),
    }
}

#[tokio::test]
async fn test_blocking_access_waits_off_the_runtime_thread() {
    let (_dir, store) = temp_store();
    let held = lock::StoreLock::acquire(&store.config.lock_path(), 1, Duration::from_millis(1)).unwrap();

    let reader = tokio::spawn({
        let store = store.clone();
        async move { store.blocking(|s| s.load()).await }
    });

    let started = std::time::Instant::now();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!reader.is_finished());

    drop(held);
    let state = reader.await.unwrap().unwrap();
    assert!(state.records.is_empty());
}
