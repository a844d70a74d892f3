use globset::{Glob, GlobSet, GlobSetBuilder};
use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fmt,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetKind {
    File,
    Directory,
}

/// A configured path resolved to canonical absolute form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitorTarget {
    pub path: PathBuf,
    pub kind: TargetKind,
}

impl MonitorTarget {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), kind: TargetKind::File }
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), kind: TargetKind::Directory }
    }
}

/// A configured target that could not be used this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetWarning {
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for TargetWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

/// Canonicalize, tag and deduplicate raw configured paths.
///
/// Missing or unsupported paths become warnings; they never fail the call.
pub fn resolve_targets(raw: &[PathBuf]) -> (Vec<MonitorTarget>, Vec<TargetWarning>) {
    let mut seen = BTreeSet::new();
    let mut warnings = Vec::new();
    for p in raw {
        let canon = match dunce::canonicalize(p) {
            Ok(c) => c,
            Err(e) => {
                warn!("monitor path {} skipped: {e}", p.display());
                warnings.push(TargetWarning { path: p.clone(), reason: e.to_string() });
                continue;
            }
        };
        let kind = match canon.metadata() {
            Ok(m) if m.is_dir() => TargetKind::Directory,
            Ok(m) if m.is_file() => TargetKind::File,
            Ok(_) => {
                warnings.push(TargetWarning { path: p.clone(), reason: "not a regular file or directory".into() });
                continue;
            }
            Err(e) => {
                warnings.push(TargetWarning { path: p.clone(), reason: e.to_string() });
                continue;
            }
        };
        seen.insert(MonitorTarget { path: canon, kind });
    }
    (seen.into_iter().collect(), warnings)
}

pub fn build_excluder(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut b = GlobSetBuilder::new();
    for p in patterns {
        b.add(Glob::new(p)?);
    }
    b.build()
}

/// Result of one enumeration: the files found plus the paths the walk
/// could not get into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enumeration {
    pub files: BTreeSet<PathBuf>,
    pub errors: BTreeMap<PathBuf, String>,
}

/// Expand targets into the ordered set of regular files beneath them.
///
/// Symlinks are followed, but each canonical directory is entered at most
/// once per call, so link cycles terminate and never produce duplicates.
/// Directories that cannot be read are returned in `errors` so their
/// contents are not mistaken for deleted files.
pub fn enumerate(targets: &[MonitorTarget], exclude: &GlobSet) -> Enumeration {
    let mut out = Enumeration::default();
    let mut visited: HashSet<PathBuf> = HashSet::new();

    for target in targets {
        match target.kind {
            TargetKind::File => {
                if exclude.is_match(&target.path) {
                    continue;
                }
                if target.path.is_file() {
                    out.files.insert(normalize_path(&target.path));
                }
            }
            TargetKind::Directory => walk_dir(&target.path, exclude, &mut visited, &mut out),
        }
    }
    out
}

fn walk_dir(root: &Path, exclude: &GlobSet, visited: &mut HashSet<PathBuf>, out: &mut Enumeration) {
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if exclude.is_match(e.path()) {
                return false;
            }
            if e.file_type().is_dir() {
                let id = normalize_path(e.path());
                if !visited.insert(id) {
                    debug!("already walked {}, skipping", e.path().display());
                    return false;
                }
            }
            true
        });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if e.loop_ancestor().is_some() => {
                debug!("symlink loop under {}: {e}", root.display());
                continue;
            }
            Err(e) => {
                let path = e.path().map(normalize_path).unwrap_or_else(|| root.to_path_buf());
                let reason = e
                    .io_error()
                    .map(|io| io.to_string())
                    .unwrap_or_else(|| e.to_string());
                warn!("cannot walk {}: {reason}", path.display());
                out.errors.insert(path, reason);
                continue;
            }
        };
        if entry.file_type().is_file() {
            out.files.insert(normalize_path(entry.path()));
        }
    }
}

pub(crate) fn normalize_path(p: &Path) -> PathBuf {
    dunce::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())
}
