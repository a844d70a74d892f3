use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use integrity_monitor::{
    alert::Mailer,
    config::Config,
    metrics,
    open_store,
    report::{AuditLog, Reporter},
    run_continuous, run_once, Baseline, BaselineStore, DiffResult, FimError, IntegrityEngine,
};
use std::{process::ExitCode, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "integrity_monitor", about = "Poll-based file integrity monitor")]
struct Cli {
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Hash all monitored files and store the first baseline
    Init {
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Replace the stored baseline with the current state
    Rebaseline {
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Run one check against the baseline and write a report
    Check {
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Check repeatedly until interrupted
    Watch {
        #[arg(short, long, default_value = "config.toml")]
        config: String,
        /// Override check_interval_seconds
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
    },
}

enum Outcome {
    Clean,
    Changes,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive(level.into()))
        .with_target(false)
        .compact()
        .init();

    match run(cli.command).await {
        Ok(Outcome::Clean) => ExitCode::SUCCESS,
        Ok(Outcome::Changes) => ExitCode::from(1),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(command: Commands) -> Result<Outcome> {
    match command {
        Commands::Init { config } => {
            let cfg = Config::load_or_create(&config)?;
            let store = open_store(&cfg.baseline_path);
            if store.exists() {
                return Err(FimError::BaselineExists(store.location().to_path_buf()).into());
            }
            write_baseline(&cfg, store.as_ref()).await?;
            println!("Baseline built at {}", cfg.baseline_path);
            Ok(Outcome::Clean)
        }
        Commands::Rebaseline { config } => {
            let cfg = Config::load(&config)?;
            let store = open_store(&cfg.baseline_path);
            write_baseline(&cfg, store.as_ref()).await?;
            println!("Baseline replaced at {}", cfg.baseline_path);
            Ok(Outcome::Clean)
        }
        Commands::Check { config } => {
            let cfg = Config::load(&config)?;
            let engine = IntegrityEngine::new(cfg.engine_settings())?;
            let baseline = load_baseline(&cfg)?;
            let mut reporter = reporter_for(&cfg)?;

            let diff = run_once(&engine, &baseline).await?;
            reporter.publish(&diff).await?;
            print_summary(&diff);
            Ok(if diff.is_clean() { Outcome::Clean } else { Outcome::Changes })
        }
        Commands::Watch { config, interval } => {
            let cfg = Config::load(&config)?;
            let interval = interval.map(Duration::from_secs).unwrap_or_else(|| cfg.interval());
            let engine = IntegrityEngine::new(cfg.engine_settings())?;
            let baseline = load_baseline(&cfg)?;
            let mut reporter = reporter_for(&cfg)?;

            let _http = match &cfg.metrics_bind {
                Some(bind) => {
                    let prom = metrics::Metrics::try_new()?;
                    prom.tracked_files.set(baseline.len() as i64);
                    let handle = metrics::serve_metrics(bind.clone(), prom.registry()).await?;
                    reporter = reporter.with_metrics(prom);
                    Some(handle)
                }
                None => None,
            };

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("interrupt received, stopping after the current step");
                        cancel.cancel();
                    }
                }
            });

            info!("Starting file integrity monitoring every {:?}", interval);
            let mut run = run_continuous(&engine, baseline, interval, cancel);
            let mut outcome = Outcome::Clean;
            while let Some(result) = run.next().await {
                let diff = match result {
                    Ok(d) => d,
                    Err(e) => {
                        reporter.record_failure();
                        return Err(e.into());
                    }
                };
                reporter.publish(&diff).await?;
                if !diff.is_clean() {
                    outcome = Outcome::Changes;
                }
            }
            println!("Monitoring stopped.");
            Ok(outcome)
        }
    }
}

async fn write_baseline(cfg: &Config, store: &dyn BaselineStore) -> Result<()> {
    let engine = IntegrityEngine::new(cfg.engine_settings())?;
    let snapshot = engine.snapshot().await?;
    let baseline = Baseline::create(snapshot);
    store.save(&baseline)?;
    Ok(())
}

fn load_baseline(cfg: &Config) -> Result<Baseline> {
    let store = open_store(&cfg.baseline_path);
    match store.load() {
        Ok(b) => Ok(b),
        Err(e) if e.is_recoverable() => {
            Err(e).context("no baseline yet; run `integrity_monitor init` first")
        }
        Err(e) => Err(e.into()),
    }
}

fn reporter_for(cfg: &Config) -> Result<Reporter> {
    let mut reporter = Reporter::new(&cfg.report_directory)
        .with_mailer(Mailer::from_config(cfg.alert_email.as_ref()));
    if let Some(path) = &cfg.audit_log {
        reporter = reporter.with_audit(AuditLog::open(path)?);
    }
    Ok(reporter)
}

fn print_summary(diff: &DiffResult) {
    for m in &diff.modified {
        println!("MODIFIED: {}", m.path.display());
    }
    for m in &diff.missing {
        println!("MISSING: {}", m.path.display());
    }
    for a in &diff.added {
        println!("ADDED: {}", a.path.display());
    }
    for u in &diff.unreadable {
        println!("UNREADABLE: {} ({})", u.path.display(), u.reason);
    }
    println!(
        "Summary -> modified: {}, missing: {}, added: {}, unchanged: {}",
        diff.modified.len(),
        diff.missing.len(),
        diff.added.len(),
        diff.unchanged_count
    );
}
