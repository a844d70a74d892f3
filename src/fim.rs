use crate::baseline::{Baseline, FileRecord, Snapshot};
use crate::diff::{compare, DiffResult};
use crate::enumerate::{build_excluder, enumerate, resolve_targets};
use crate::error::{FimError, Result};
use crate::hasher::{hash_file, HashAlgorithm};
use globset::GlobSet;
use std::{path::PathBuf, sync::Arc};
use tokio::task::JoinSet;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Inputs the engine needs; built from the config by the caller.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub monitor_paths: Vec<PathBuf>,
    pub exclude: Vec<String>,
    pub algorithm: HashAlgorithm,
    pub workers: usize,
}

/// Enumerate, hash and diff. Read-only with respect to the filesystem and
/// the baseline it is handed.
#[derive(Debug, Clone)]
pub struct IntegrityEngine {
    monitor_paths: Vec<PathBuf>,
    exclude: Arc<GlobSet>,
    algorithm: HashAlgorithm,
    workers: usize,
}

impl IntegrityEngine {
    pub fn new(settings: EngineSettings) -> Result<Self> {
        let exclude = build_excluder(&settings.exclude)?;
        Ok(Self {
            monitor_paths: settings.monitor_paths,
            exclude: Arc::new(exclude),
            algorithm: settings.algorithm,
            workers: settings.workers.max(1),
        })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Capture the current state using the configured algorithm.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        self.snapshot_with(self.algorithm).await
    }

    /// Capture the current state. Per-file failures end up in
    /// `Snapshot::unreadable`; only a cycle with nothing to scan fails.
    pub async fn snapshot_with(&self, algorithm: HashAlgorithm) -> Result<Snapshot> {
        let raw = self.monitor_paths.clone();
        let exclude = Arc::clone(&self.exclude);
        let (found, warnings) = tokio::task::spawn_blocking(move || {
            if raw.is_empty() {
                return Err(FimError::NoTargets("no monitor paths configured".into()));
            }
            let (targets, warnings) = resolve_targets(&raw);
            if targets.is_empty() {
                return Err(FimError::NoTargets("all configured monitor paths are missing".into()));
            }
            Ok((enumerate(&targets, &exclude), warnings))
        })
        .await
        .map_err(|e| FimError::Worker(e.to_string()))??;

        debug!("enumerated {} files", found.files.len());
        let mut snapshot = Snapshot::new(algorithm);
        snapshot.warnings = warnings.iter().map(|w| w.to_string()).collect();
        snapshot.unreadable = found.errors;

        let hashed = hash_pool(found.files, self.workers, move |path| hash_one(path, algorithm)).await?;
        for outcome in hashed {
            match outcome {
                Ok(record) => snapshot.insert(record),
                Err((path, reason)) => {
                    warn!("unreadable {}: {reason}", path.display());
                    snapshot.unreadable.insert(path, reason);
                }
            }
        }

        Ok(snapshot)
    }

    /// One full enumerate → hash → diff pass against `baseline`.
    ///
    /// Hashes with the baseline's algorithm so a config change alone never
    /// reports every file as modified.
    pub async fn check(&self, baseline: &Baseline) -> Result<DiffResult> {
        if baseline.algorithm != self.algorithm {
            warn!(
                "baseline uses {} but config asks for {}; checking with {}",
                baseline.algorithm, self.algorithm, baseline.algorithm
            );
        }
        let snapshot = self.snapshot_with(baseline.algorithm).await?;
        let diff = compare(baseline, &snapshot);
        info!(
            "Summary -> modified: {}, missing: {}, added: {}, unreadable: {}, unchanged: {}",
            diff.modified.len(),
            diff.missing.len(),
            diff.added.len(),
            diff.unreadable.len(),
            diff.unchanged_count
        );
        Ok(diff)
    }
}

/// Run `job` for every path on blocking threads, never more than `workers`
/// at once. Results come back to the caller; jobs share no state.
async fn hash_pool<T, F>(paths: impl IntoIterator<Item = PathBuf>, workers: usize, job: F) -> Result<Vec<T>>
where
    T: Send + 'static,
    F: Fn(PathBuf) -> T + Clone + Send + 'static,
{
    let mut pending = paths.into_iter();
    let mut set = JoinSet::new();
    let mut done = Vec::new();
    loop {
        while set.len() < workers.max(1) {
            let Some(path) = pending.next() else { break };
            let job = job.clone();
            set.spawn_blocking(move || job(path));
        }
        let Some(joined) = set.join_next().await else { break };
        done.push(joined.map_err(|e| FimError::Worker(e.to_string()))?);
    }
    Ok(done)
}

fn hash_one(path: PathBuf, algorithm: HashAlgorithm) -> std::result::Result<FileRecord, (PathBuf, String)> {
    match hash_file(&path, algorithm) {
        Ok(d) => Ok(FileRecord {
            path,
            digest: d.hex,
            size_bytes: d.size,
            last_seen: OffsetDateTime::now_utc(),
        }),
        Err(e) => Err((path, e.to_string())),
    }
}

/// Default pool size: available parallelism, at most 8.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, 8)
}
