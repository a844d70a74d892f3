use crate::diff::DiffResult;
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub scans: IntCounter,
    pub scan_failures: IntCounter,
    pub tracked_files: IntGauge,
    pub modified: IntGauge,
    pub missing: IntGauge,
    pub added: IntGauge,
    pub unreadable: IntGauge,
    pub last_scan: IntGauge,
}

impl Metrics {
    pub fn try_new() -> Result<Self> {
        let registry = Registry::new();
        let scans = IntCounter::new("fim_scans_total", "Completed scan cycles")
            .context("create metric scans")?;
        let scan_failures = IntCounter::new("fim_scan_failures_total", "Scan cycles that failed")
            .context("create metric scan_failures")?;
        let tracked_files = IntGauge::new("fim_tracked_files", "Files in the baseline")
            .context("create metric tracked_files")?;
        let modified = IntGauge::new("fim_modified_files", "Modified files in the last scan")
            .context("create metric modified")?;
        let missing = IntGauge::new("fim_missing_files", "Missing files in the last scan")
            .context("create metric missing")?;
        let added = IntGauge::new("fim_added_files", "Added files in the last scan")
            .context("create metric added")?;
        let unreadable = IntGauge::new("fim_unreadable_files", "Unreadable files in the last scan")
            .context("create metric unreadable")?;
        let last_scan = IntGauge::new("fim_last_scan_timestamp_seconds", "Unix time of the last completed scan")
            .context("create metric last_scan")?;

        registry.register(Box::new(scans.clone()))
            .context("register scans")?;
        registry.register(Box::new(scan_failures.clone()))
            .context("register scan_failures")?;
        registry.register(Box::new(tracked_files.clone()))
            .context("register tracked_files")?;
        registry.register(Box::new(modified.clone()))
            .context("register modified")?;
        registry.register(Box::new(missing.clone()))
            .context("register missing")?;
        registry.register(Box::new(added.clone()))
            .context("register added")?;
        registry.register(Box::new(unreadable.clone()))
            .context("register unreadable")?;
        registry.register(Box::new(last_scan.clone()))
            .context("register last_scan")?;

        Ok(Self { registry, scans, scan_failures, tracked_files, modified, missing, added, unreadable, last_scan })
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    pub fn observe(&self, diff: &DiffResult) {
        self.scans.inc();
        self.modified.set(diff.modified.len() as i64);
        self.missing.set(diff.missing.len() as i64);
        self.added.set(diff.added.len() as i64);
        self.unreadable.set(diff.unreadable.len() as i64);
        self.last_scan.set(diff.timestamp.unix_timestamp());
    }
}

pub async fn serve_metrics(bind: String, registry: Registry) -> Result<JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || metrics_handler(registry.clone())))
        .route("/healthz", get(|| async { "ok" }));

    let addr: SocketAddr = bind.parse().context("parse metrics bind addr")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind metrics listener {addr}"))?;
    info!("metrics server listening on http://{}/ (paths: /metrics, /healthz)", listener.local_addr()?);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("metrics server failed: {e}");
        }
    });
    Ok(handle)
}

async fn metrics_handler(registry: Registry) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# metrics encode error: {e}");
    }
    String::from_utf8(buffer).unwrap_or_else(|_| "# metrics utf8 error".to_string())
}
