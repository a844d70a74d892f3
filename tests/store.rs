use integrity_monitor::{
    baseline::{JsonBaselineStore, SqliteBaselineStore},
    open_store, Baseline, BaselineStore, FileRecord, FimError, HashAlgorithm, Snapshot,
};
use std::{fs, path::PathBuf};
use tempfile::tempdir;
use time::{Duration, OffsetDateTime};

fn sample(alg: HashAlgorithm) -> Baseline {
    let mut snap = Snapshot::new(alg);
    let seen = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
    snap.taken_at = seen + Duration::seconds(5);
    for (p, d, size) in [("/etc/hosts", "aa", 10u64), ("/etc/passwd", "bb", 20)] {
        snap.insert(FileRecord {
            path: PathBuf::from(p),
            digest: d.to_string(),
            size_bytes: size,
            last_seen: seen,
        });
    }
    Baseline::create(snap)
}

#[test]
fn json_round_trip() {
    let dir = tempdir().unwrap();
    let store = JsonBaselineStore::new(dir.path().join("nested/baseline.json"));
    let b = sample(HashAlgorithm::Sha256);
    store.save(&b).unwrap();
    assert_eq!(store.load().unwrap(), b);

    let raw = fs::read_to_string(store.location()).unwrap();
    assert!(raw.contains("\"sizeBytes\": 10"));
    assert!(raw.contains("\"lastSeen\""));
    assert!(raw.contains("\"algorithm\": \"sha256\""));
}

#[test]
fn json_save_replaces_and_leaves_no_temp_files() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("baseline.json");
    let store = JsonBaselineStore::new(&path);
    store.save(&sample(HashAlgorithm::Sha256)).unwrap();

    let mut smaller = sample(HashAlgorithm::Sha256);
    smaller.records.retain(|p, _| p.ends_with("hosts"));
    store.save(&smaller).unwrap();

    assert_eq!(store.load().unwrap().len(), 1);
    let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn missing_baseline_is_recoverable() {
    let dir = tempdir().unwrap();
    for name in ["b.json", "b.db"] {
        let store = open_store(dir.path().join(name));
        let err = store.load().unwrap_err();
        assert!(matches!(err, FimError::BaselineNotFound(_)), "{name}: {err}");
        assert!(err.is_recoverable());
    }
}

#[test]
fn corrupt_json_is_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("baseline.json");
    fs::write(&path, "{ not json").unwrap();
    let err = JsonBaselineStore::new(&path).load().unwrap_err();
    assert!(matches!(err, FimError::BaselineFormat { .. }));
    assert!(!err.is_recoverable());
}

#[test]
fn sqlite_round_trip_and_replace() {
    let dir = tempdir().unwrap();
    let store = SqliteBaselineStore::new(dir.path().join("baseline.db"));
    let b = sample(HashAlgorithm::Blake3);
    store.save(&b).unwrap();
    assert_eq!(store.load().unwrap(), b);

    let mut smaller = b.clone();
    smaller.records.retain(|p, _| p.ends_with("passwd"));
    store.save(&smaller).unwrap();
    let loaded = store.load().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded.algorithm, HashAlgorithm::Blake3);
}

#[test]
fn open_store_picks_backend_by_extension() {
    let dir = tempdir().unwrap();
    let b = sample(HashAlgorithm::Sha256);
    for name in ["x.json", "x.sqlite", "x.db"] {
        let store = open_store(dir.path().join(name));
        store.save(&b).unwrap();
        assert_eq!(store.load().unwrap(), b);
    }
    let head = fs::read(dir.path().join("x.db")).unwrap();
    assert!(head.starts_with(b"SQLite format 3"));
}

#[test]
fn same_content_compares_digests_only() {
    let b = sample(HashAlgorithm::Sha256);
    let mut snap = Snapshot::new(HashAlgorithm::Sha256);
    for r in b.records.values() {
        let mut r = r.clone();
        r.last_seen = OffsetDateTime::now_utc();
        snap.insert(r);
    }
    assert!(b.same_content(&snap));
    snap.records.values_mut().next().unwrap().digest = "changed".into();
    assert!(!b.same_content(&snap));
}

#[test]
fn sqlite_without_meta_rows_is_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("baseline.db");
    SqliteBaselineStore::new(&path).save(&sample(HashAlgorithm::Sha256)).unwrap();

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute("DELETE FROM meta", []).unwrap();
    drop(conn);

    let err = SqliteBaselineStore::new(&path).load().unwrap_err();
    assert!(matches!(err, FimError::BaselineFormat { .. }), "{err}");
    assert!(!err.is_recoverable());
}

#[cfg(unix)]
#[tokio::test]
async fn non_utf8_file_name_survives_both_backends() {
    use integrity_monitor::{fim::EngineSettings, run_once, IntegrityEngine};
    use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

    let dir = tempdir().unwrap();
    let watched = dir.path().join("watched");
    fs::create_dir(&watched).unwrap();
    let odd = watched.join(OsStr::from_bytes(b"bad\xff.txt"));
    if fs::write(&odd, "payload").is_err() {
        // filesystem refuses non-UTF-8 names
        return;
    }
    fs::write(watched.join("plain.txt"), "plain").unwrap();

    let engine = IntegrityEngine::new(EngineSettings {
        monitor_paths: vec![watched.clone()],
        exclude: vec![],
        algorithm: HashAlgorithm::Sha256,
        workers: 2,
    })
    .unwrap();
    let baseline = Baseline::create(engine.snapshot().await.unwrap());
    let odd_canon = dunce::canonicalize(&odd).unwrap();
    assert!(baseline.get(&odd_canon).is_some());

    for name in ["baseline.json", "baseline.db"] {
        let store = open_store(dir.path().join(name));
        store.save(&baseline).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded, baseline, "{name}");

        let diff = run_once(&engine, &loaded).await.unwrap();
        assert!(diff.is_clean(), "{name}: {diff:?}");
        assert_eq!(diff.unchanged_count, 2);
    }
}
