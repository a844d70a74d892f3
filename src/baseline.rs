use crate::error::{FimError, Result};
use crate::hasher::HashAlgorithm;
use rusqlite::{params, types::ValueRef, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

const FORMAT_VERSION: u32 = 1;

/// JSON keys carrying raw path bytes start with this marker.
const RAW_KEY_PREFIX: &str = "hex:";

/// One known file: content digest plus metadata captured when hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub digest: String,
    pub size_bytes: u64,
    pub last_seen: OffsetDateTime,
}

/// Current on-disk state captured during one check cycle.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub taken_at: OffsetDateTime,
    pub algorithm: HashAlgorithm,
    pub records: BTreeMap<PathBuf, FileRecord>,
    /// Paths that were enumerated but could not be hashed, with the reason.
    pub unreadable: BTreeMap<PathBuf, String>,
    /// Configured targets skipped this cycle.
    pub warnings: Vec<String>,
}

impl Snapshot {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            taken_at: OffsetDateTime::now_utc(),
            algorithm,
            records: BTreeMap::new(),
            unreadable: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    pub fn insert(&mut self, record: FileRecord) {
        self.records.insert(record.path.clone(), record);
    }
}

/// The accepted "known good" state. Only replaced by an explicit rebaseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    pub created: OffsetDateTime,
    pub algorithm: HashAlgorithm,
    pub records: BTreeMap<PathBuf, FileRecord>,
}

impl Baseline {
    /// Accept a snapshot as the new baseline. Unreadable paths are left out.
    pub fn create(snapshot: Snapshot) -> Self {
        for (p, reason) in &snapshot.unreadable {
            warn!("{} not included in baseline: {reason}", p.display());
        }
        Self {
            created: snapshot.taken_at,
            algorithm: snapshot.algorithm,
            records: snapshot.records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<&FileRecord> {
        self.records.get(path)
    }

    /// `true` when both hold the same paths with the same digests.
    pub fn same_content(&self, snapshot: &Snapshot) -> bool {
        self.records.len() == snapshot.records.len()
            && self
                .records
                .iter()
                .zip(snapshot.records.iter())
                .all(|((pa, a), (pb, b))| pa == pb && a.digest == b.digest)
    }
}

/// Persistence for the baseline. Implementations must never expose a
/// partially written baseline.
pub trait BaselineStore: Send + Sync {
    fn load(&self) -> Result<Baseline>;
    fn save(&self, baseline: &Baseline) -> Result<()>;
    fn location(&self) -> &Path;

    fn exists(&self) -> bool {
        self.location().exists()
    }
}

/// Pick a backend from the file extension: SQLite for `.db`/`.sqlite`, JSON otherwise.
pub fn open_store(path: impl Into<PathBuf>) -> Box<dyn BaselineStore> {
    let path = path.into();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "db" | "sqlite" | "sqlite3" => Box::new(SqliteBaselineStore::new(path)),
        _ => Box::new(JsonBaselineStore::new(path)),
    }
}

#[derive(Serialize, Deserialize)]
struct BaselineDocument {
    version: u32,
    algorithm: HashAlgorithm,
    #[serde(with = "time::serde::rfc3339")]
    created: OffsetDateTime,
    files: BTreeMap<String, StoredRecord>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    digest: String,
    size_bytes: u64,
    #[serde(with = "time::serde::rfc3339")]
    last_seen: OffsetDateTime,
}

/// JSON document on disk, replaced via temp file + rename.
#[derive(Debug, Clone)]
pub struct JsonBaselineStore {
    path: PathBuf,
}

impl JsonBaselineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_err(&self, source: io::Error) -> FimError {
        FimError::BaselineIo { path: self.path.clone(), source }
    }
}

impl BaselineStore for JsonBaselineStore {
    fn load(&self) -> Result<Baseline> {
        let raw = match fs::read(&self.path) {
            Ok(r) => r,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(FimError::BaselineNotFound(self.path.clone()))
            }
            Err(e) => return Err(self.io_err(e)),
        };
        let doc: BaselineDocument = serde_json::from_slice(&raw).map_err(|e| FimError::BaselineFormat {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        if doc.version != FORMAT_VERSION {
            return Err(FimError::BaselineFormat {
                path: self.path.clone(),
                reason: format!("unsupported version {}", doc.version),
            });
        }
        let mut records = BTreeMap::new();
        for (key, r) in doc.files {
            let path = path_from_key(&key).ok_or_else(|| FimError::BaselineFormat {
                path: self.path.clone(),
                reason: format!("bad path key {key:?}"),
            })?;
            let rec = FileRecord {
                path: path.clone(),
                digest: r.digest,
                size_bytes: r.size_bytes,
                last_seen: r.last_seen,
            };
            records.insert(path, rec);
        }
        debug!("loaded baseline from {}", self.path.display());
        Ok(Baseline { created: doc.created, algorithm: doc.algorithm, records })
    }

    fn save(&self, baseline: &Baseline) -> Result<()> {
        let doc = BaselineDocument {
            version: FORMAT_VERSION,
            algorithm: baseline.algorithm,
            created: baseline.created,
            files: baseline
                .records
                .iter()
                .map(|(p, r)| {
                    let stored = StoredRecord {
                        digest: r.digest.clone(),
                        size_bytes: r.size_bytes,
                        last_seen: r.last_seen,
                    };
                    (path_key(p), stored)
                })
                .collect(),
        };

        let dir = match self.path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.io_err(e))?;

        let tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_err(e))?;
        {
            let mut w = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut w, &doc)
                .map_err(|e| self.io_err(io::Error::new(io::ErrorKind::Other, e)))?;
            w.flush().map_err(|e| self.io_err(e))?;
        }
        tmp.as_file().sync_all().map_err(|e| self.io_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;
        info!("Baseline: {} files written to {}", baseline.len(), self.path.display());
        Ok(())
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

/// SQLite database; a save swaps all rows inside one IMMEDIATE transaction.
#[derive(Debug, Clone)]
pub struct SqliteBaselineStore {
    path: PathBuf,
}

impl SqliteBaselineStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        init_schema(&conn)?;
        Ok(conn)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
    PRAGMA journal_mode=WAL;
    CREATE TABLE IF NOT EXISTS files (
      path BLOB PRIMARY KEY,
      digest TEXT NOT NULL,
      size INTEGER NOT NULL,
      last_seen TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS meta (
      key TEXT PRIMARY KEY,
      value TEXT NOT NULL
    );
    "#,
    )?;
    Ok(())
}

fn format_ts(ts: OffsetDateTime, path: &Path) -> Result<String> {
    ts.format(&time::format_description::well_known::Rfc3339)
        .map_err(|e| FimError::BaselineFormat { path: path.to_path_buf(), reason: e.to_string() })
}

fn parse_ts(s: &str, path: &Path) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)
        .map_err(|e| FimError::BaselineFormat { path: path.to_path_buf(), reason: e.to_string() })
}

impl BaselineStore for SqliteBaselineStore {
    fn load(&self) -> Result<Baseline> {
        if !self.path.exists() {
            return Err(FimError::BaselineNotFound(self.path.clone()));
        }
        let conn = self.open()?;
        let meta = |key: &str| -> Result<Option<String>> {
            Ok(conn
                .query_row("SELECT value FROM meta WHERE key=?1", params![key], |r| r.get(0))
                .optional()?)
        };
        let (Some(alg), Some(created)) = (meta("algorithm")?, meta("created")?) else {
            return Err(FimError::BaselineFormat {
                path: self.path.clone(),
                reason: "missing meta rows".into(),
            });
        };
        let algorithm = alg
            .parse::<HashAlgorithm>()
            .map_err(|reason| FimError::BaselineFormat { path: self.path.clone(), reason })?;
        let created = parse_ts(&created, &self.path)?;

        let mut stmt = conn.prepare("SELECT path, digest, size, last_seen FROM files")?;
        let rows = stmt.query_map([], |r| {
            // rows written by older versions hold the path as TEXT
            let path = match r.get_ref(0)? {
                ValueRef::Blob(b) | ValueRef::Text(b) => b.to_vec(),
                other => return Err(rusqlite::Error::InvalidColumnType(0, "path".into(), other.data_type())),
            };
            Ok((path, r.get::<_, String>(1)?, r.get::<_, i64>(2)?, r.get::<_, String>(3)?))
        })?;
        let mut records = BTreeMap::new();
        for row in rows {
            let (path, digest, size, last_seen) = row?;
            let path = path_from_bytes(path);
            let rec = FileRecord {
                path: path.clone(),
                digest,
                size_bytes: size as u64,
                last_seen: parse_ts(&last_seen, &self.path)?,
            };
            records.insert(path, rec);
        }
        Ok(Baseline { created, algorithm, records })
    }

    fn save(&self, baseline: &Baseline) -> Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM files", [])?;
        {
            let mut ins = tx.prepare("INSERT INTO files(path, digest, size, last_seen) VALUES(?1, ?2, ?3, ?4)")?;
            for r in baseline.records.values() {
                ins.execute(params![
                    path_bytes(&r.path),
                    r.digest,
                    r.size_bytes as i64,
                    format_ts(r.last_seen, &self.path)?
                ])?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO meta(key, value) VALUES('algorithm', ?1)",
            params![baseline.algorithm.as_str()],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO meta(key, value) VALUES('created', ?1)",
            params![format_ts(baseline.created, &self.path)?],
        )?;
        tx.commit()?;
        info!("Baseline: {} files indexed (transactional) in {}", baseline.len(), self.path.display());
        Ok(())
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

/// Valid UTF-8 paths are stored as-is; anything else as hex of the raw bytes.
fn path_key(path: &Path) -> String {
    match path.to_str() {
        Some(s) if !s.starts_with(RAW_KEY_PREFIX) => s.to_owned(),
        _ => {
            let hex: String = path_bytes(path).iter().map(|b| format!("{b:02x}")).collect();
            format!("{RAW_KEY_PREFIX}{hex}")
        }
    }
}

fn path_from_key(key: &str) -> Option<PathBuf> {
    let Some(hex) = key.strip_prefix(RAW_KEY_PREFIX) else {
        return Some(PathBuf::from(key));
    };
    if hex.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    Some(path_from_bytes(bytes))
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

#[cfg(unix)]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    use std::os::unix::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_vec(bytes))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: Vec<u8>) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}
