use crate::fim::{default_workers, EngineSettings};
use crate::hasher::HashAlgorithm;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::warn;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default, alias = "monitorPaths")]
    pub monitor_paths: Vec<String>,
    #[serde(default = "default_interval", alias = "checkIntervalSeconds", alias = "check_interval")]
    pub check_interval_seconds: u64,
    #[serde(default = "default_baseline_path", alias = "baselinePath")]
    pub baseline_path: String,
    #[serde(default = "default_report_dir", alias = "reportDirectory", alias = "report_dir")]
    pub report_directory: String,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default, alias = "hashAlg")]
    pub hash_alg: HashAlgorithm,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default, alias = "auditLog", skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<String>,
    #[serde(default, alias = "metricsBind", skip_serializing_if = "Option::is_none")]
    pub metrics_bind: Option<String>,
    #[serde(default, alias = "alertEmail", skip_serializing_if = "Option::is_none")]
    pub alert_email: Option<AlertEmail>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AlertEmail {
    #[serde(default)]
    pub enabled: bool,
    pub recipient: String,
    #[serde(default = "default_smtp_host", alias = "smtpHost")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port", alias = "smtpPort")]
    pub smtp_port: u16,
    #[serde(default = "default_sender")]
    pub sender: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monitor_paths: Vec::new(),
            check_interval_seconds: default_interval(),
            baseline_path: default_baseline_path(),
            report_directory: default_report_dir(),
            exclude: Vec::new(),
            hash_alg: HashAlgorithm::default(),
            workers: default_workers(),
            audit_log: None,
            metrics_bind: None,
            alert_email: None,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let s = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path))?;
        let cfg: Config = if is_json(path) {
            serde_json::from_str(&s).with_context(|| format!("invalid JSON in {}", path))?
        } else {
            toml::from_str(&s).with_context(|| format!("invalid TOML in {}", path))?
        };
        cfg.validate().with_context(|| format!("invalid config {}", path))?;
        Ok(cfg)
    }

    /// Load `path`, writing a default config there first if it does not exist.
    pub fn load_or_create(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            warn!("config {} not found, writing defaults", path);
            let cfg = Config::default();
            let body = if is_json(path) {
                serde_json::to_string_pretty(&cfg)?
            } else {
                toml::to_string_pretty(&cfg)?
            };
            fs::write(path, body).with_context(|| format!("failed to write default config {}", path))?;
        }
        Self::load(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.check_interval_seconds == 0 {
            bail!("check_interval_seconds must be greater than zero");
        }
        if self.workers == 0 {
            bail!("workers must be greater than zero");
        }
        if let Some(mail) = &self.alert_email {
            if mail.enabled && mail.recipient.trim().is_empty() {
                bail!("alert_email.recipient is required when alerts are enabled");
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            monitor_paths: self.monitor_paths.iter().map(PathBuf::from).collect(),
            exclude: self.exclude.clone(),
            algorithm: self.hash_alg,
            workers: self.workers,
        }
    }
}

fn is_json(path: &str) -> bool {
    Path::new(path)
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

fn default_interval() -> u64 { 60 }
fn default_baseline_path() -> String { "baseline_hashes.json".to_string() }
fn default_report_dir() -> String { "reports".to_string() }
fn default_smtp_host() -> String { "localhost".to_string() }
fn default_smtp_port() -> u16 { 25 }
fn default_sender() -> String { "integrity_checker@system".to_string() }
