use crate::alert::Mailer;
use crate::diff::DiffResult;
use crate::metrics::Metrics;
use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use time::macros::format_description;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct AuditEvent<'a> {
    ts: i128,
    kind: &'a str,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    old_hash: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_hash: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

/// Write `diff` as pretty JSON into `dir`, named after its timestamp.
/// Never overwrites an existing report.
pub fn write_report(dir: &Path, diff: &DiffResult) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("create report dir {}", dir.display()))?;
    let stamp = diff
        .timestamp
        .format(format_description!("[year][month][day]_[hour][minute][second]"))
        .context("format report timestamp")?;
    let body = serde_json::to_vec_pretty(diff)?;

    let mut n = 0u32;
    loop {
        let name = if n == 0 {
            format!("integrity_report_{stamp}.json")
        } else {
            format!("integrity_report_{stamp}_{n}.json")
        };
        let path = dir.join(name);
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut f) => {
                f.write_all(&body).with_context(|| format!("write report {}", path.display()))?;
                info!("Integrity report generated: {}", path.display());
                return Ok(path);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e).with_context(|| format!("create report {}", path.display())),
        }
    }
}

/// Append-only JSONL log with one line per reported path.
pub struct AuditLog {
    file: fs::File,
}

impl AuditLog {
    pub fn open(path: &str) -> Result<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context("open jsonl")?;
        Ok(Self { file })
    }

    /// Returns the number of events written.
    pub fn append(&mut self, diff: &DiffResult) -> Result<usize> {
        let ts = diff.timestamp.unix_timestamp_nanos() / 1_000_000;
        let mut events = Vec::new();
        for m in &diff.modified {
            events.push(AuditEvent {
                ts,
                kind: "modified",
                path: m.path.to_string_lossy().to_string(),
                old_hash: Some(m.old_digest.as_str()),
                new_hash: Some(m.new_digest.as_str()),
                reason: None,
            });
        }
        for m in &diff.missing {
            events.push(AuditEvent {
                ts,
                kind: "missing",
                path: m.path.to_string_lossy().to_string(),
                old_hash: Some(m.old_digest.as_str()),
                new_hash: None,
                reason: None,
            });
        }
        for a in &diff.added {
            events.push(AuditEvent {
                ts,
                kind: "added",
                path: a.path.to_string_lossy().to_string(),
                old_hash: None,
                new_hash: Some(a.new_digest.as_str()),
                reason: None,
            });
        }
        for u in &diff.unreadable {
            events.push(AuditEvent {
                ts,
                kind: "unreadable",
                path: u.path.to_string_lossy().to_string(),
                old_hash: None,
                new_hash: None,
                reason: Some(u.reason.as_str()),
            });
        }
        for evt in &events {
            write_jsonl(&mut self.file, evt)?;
        }
        Ok(events.len())
    }
}

fn write_jsonl(f: &mut fs::File, evt: &AuditEvent<'_>) -> Result<()> {
    let line = serde_json::to_string(evt)? + "\n";
    f.write_all(line.as_bytes())?;
    Ok(())
}

/// Hands every cycle result to the configured collaborators.
pub struct Reporter {
    report_dir: PathBuf,
    audit: Option<AuditLog>,
    mailer: Option<Mailer>,
    metrics: Option<Metrics>,
}

impl Reporter {
    pub fn new(report_dir: impl Into<PathBuf>) -> Self {
        Self { report_dir: report_dir.into(), audit: None, mailer: None, metrics: None }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_mailer(mut self, mailer: Option<Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Report, audit, alert. Only a failed report write is an error;
    /// audit and mail problems are logged.
    pub async fn publish(&mut self, diff: &DiffResult) -> Result<PathBuf> {
        if let Some(m) = &self.metrics {
            m.observe(diff);
        }
        let path = write_report(&self.report_dir, diff)?;
        if let Some(audit) = &mut self.audit {
            if let Err(e) = audit.append(diff) {
                warn!("audit log write failed: {e:#}");
            }
        }
        if let Some(mailer) = &self.mailer {
            if let Err(e) = mailer.notify(diff).await {
                warn!("Failed to send alert email: {e:#}");
            }
        }
        Ok(path)
    }

    pub fn record_failure(&self) {
        if let Some(m) = &self.metrics {
            m.scan_failures.inc();
        }
    }
}
