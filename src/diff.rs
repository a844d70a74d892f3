//! Classification of one check cycle against the baseline.
//!
//! This is a plain map comparison: no content diffing and no rename
//! detection. A moved file shows up as one `missing` plus one `added`.

use crate::baseline::{Baseline, Snapshot};
use serde::Serialize;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Modified {
    pub path: PathBuf,
    pub old_digest: String,
    pub new_digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Missing {
    pub path: PathBuf,
    pub old_digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Added {
    pub path: PathBuf,
    pub new_digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unreadable {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of one check cycle. Never mutated after [`compare`] builds it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub modified: Vec<Modified>,
    pub missing: Vec<Missing>,
    pub added: Vec<Added>,
    pub unreadable: Vec<Unreadable>,
    pub unchanged_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl DiffResult {
    /// No modified, missing or added paths. Unreadable entries do not count.
    pub fn is_clean(&self) -> bool {
        self.modified.is_empty() && self.missing.is_empty() && self.added.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.modified.len() + self.missing.len() + self.added.len()
    }
}

/// Diff a snapshot against the baseline. Pure; performs no I/O.
///
/// A baseline path that failed to hash, or that sits under a directory the
/// walk could not read, is reported only as `unreadable`, never as `missing`.
pub fn compare(baseline: &Baseline, snapshot: &Snapshot) -> DiffResult {
    let mut modified = Vec::new();
    let mut missing = Vec::new();
    let mut added = Vec::new();
    let mut unchanged_count = 0usize;

    for (path, old) in &baseline.records {
        match snapshot.records.get(path) {
            Some(new) if new.digest != old.digest => modified.push(Modified {
                path: path.clone(),
                old_digest: old.digest.clone(),
                new_digest: new.digest.clone(),
            }),
            Some(_) => unchanged_count += 1,
            None if shadowed_by_unreadable(path, snapshot) => {}
            None => missing.push(Missing { path: path.clone(), old_digest: old.digest.clone() }),
        }
    }

    for (path, new) in &snapshot.records {
        if !baseline.records.contains_key(path) {
            added.push(Added { path: path.clone(), new_digest: new.digest.clone() });
        }
    }

    let unreadable = snapshot
        .unreadable
        .iter()
        .map(|(path, reason)| Unreadable { path: path.clone(), reason: reason.clone() })
        .collect();

    DiffResult {
        timestamp: snapshot.taken_at,
        modified,
        missing,
        added,
        unreadable,
        unchanged_count,
        warnings: snapshot.warnings.clone(),
    }
}

fn shadowed_by_unreadable(path: &Path, snapshot: &Snapshot) -> bool {
    path.ancestors().any(|p| snapshot.unreadable.contains_key(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::FileRecord;
    use crate::hasher::HashAlgorithm;
    use std::collections::BTreeSet;

    fn rec(path: &str, digest: &str) -> FileRecord {
        FileRecord {
            path: PathBuf::from(path),
            digest: digest.to_string(),
            size_bytes: 1,
            last_seen: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn snapshot(entries: &[(&str, &str)]) -> Snapshot {
        let mut s = Snapshot::new(HashAlgorithm::Sha256);
        for (p, d) in entries {
            s.insert(rec(p, d));
        }
        s
    }

    fn baseline(entries: &[(&str, &str)]) -> Baseline {
        Baseline::create(snapshot(entries))
    }

    #[test]
    fn unchanged_tree_is_clean() {
        let b = baseline(&[("/a", "1"), ("/b", "2")]);
        let d = compare(&b, &snapshot(&[("/a", "1"), ("/b", "2")]));
        assert!(d.is_clean());
        assert_eq!(d.unchanged_count, 2);
    }

    #[test]
    fn classifies_each_kind() {
        let b = baseline(&[("/a", "1"), ("/b", "2"), ("/c", "3")]);
        let d = compare(&b, &snapshot(&[("/a", "1"), ("/b", "9"), ("/d", "4")]));
        assert_eq!(d.modified, vec![Modified { path: "/b".into(), old_digest: "2".into(), new_digest: "9".into() }]);
        assert_eq!(d.missing, vec![Missing { path: "/c".into(), old_digest: "3".into() }]);
        assert_eq!(d.added, vec![Added { path: "/d".into(), new_digest: "4".into() }]);
        assert_eq!(d.unchanged_count, 1);
        assert_eq!(d.change_count(), 3);
        assert!(!d.is_clean());
    }

    #[test]
    fn moved_file_is_missing_plus_added() {
        let b = baseline(&[("/old", "x")]);
        let d = compare(&b, &snapshot(&[("/new", "x")]));
        assert_eq!(d.missing.len(), 1);
        assert_eq!(d.added.len(), 1);
        assert!(d.modified.is_empty());
    }

    #[test]
    fn unreadable_is_neither_missing_nor_added() {
        let b = baseline(&[("/a", "1"), ("/locked", "2")]);
        let mut s = snapshot(&[("/a", "1")]);
        s.unreadable.insert("/locked".into(), "permission denied".into());
        s.unreadable.insert("/fresh".into(), "permission denied".into());
        let d = compare(&b, &s);
        assert!(d.is_clean());
        assert_eq!(d.unreadable.len(), 2);
        assert_eq!(d.unchanged_count, 1);
    }

    #[test]
    fn files_under_unreadable_directory_are_not_missing() {
        let b = baseline(&[("/srv/locked/x", "1"), ("/srv/locked/deep/y", "2"), ("/srv/z", "3")]);
        let mut s = snapshot(&[("/srv/z", "3")]);
        s.unreadable.insert("/srv/locked".into(), "Permission denied (os error 13)".into());
        let d = compare(&b, &s);
        assert!(d.missing.is_empty());
        assert!(d.is_clean());
        assert_eq!(d.unreadable.len(), 1);
        assert_eq!(d.unreadable[0].path, PathBuf::from("/srv/locked"));

        // a sibling with a shared name prefix is still missing
        let b = baseline(&[("/srv/locked2/x", "1")]);
        let d = compare(&b, &s);
        assert_eq!(d.missing.len(), 1);
    }

    #[test]
    fn path_sets_are_covered_exactly() {
        let b = baseline(&[("/a", "1"), ("/b", "2"), ("/c", "3")]);
        let s = snapshot(&[("/a", "1"), ("/b", "7"), ("/e", "5")]);
        let d = compare(&b, &s);

        let unchanged: BTreeSet<PathBuf> = b
            .records
            .keys()
            .filter(|p| s.records.get(*p).map(|r| &r.digest) == b.records.get(*p).map(|r| &r.digest))
            .cloned()
            .collect();
        assert_eq!(unchanged.len(), d.unchanged_count);

        let mut from_baseline: BTreeSet<PathBuf> = d.modified.iter().map(|m| m.path.clone()).collect();
        from_baseline.extend(d.missing.iter().map(|m| m.path.clone()));
        from_baseline.extend(unchanged.iter().cloned());
        assert_eq!(from_baseline, b.records.keys().cloned().collect());

        let mut from_snapshot: BTreeSet<PathBuf> = d.modified.iter().map(|m| m.path.clone()).collect();
        from_snapshot.extend(d.added.iter().map(|a| a.path.clone()));
        from_snapshot.extend(unchanged);
        assert_eq!(from_snapshot, s.records.keys().cloned().collect());
    }
}
