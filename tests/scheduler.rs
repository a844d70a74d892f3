use integrity_monitor::{
    fim::EngineSettings, run_continuous, Baseline, ContinuousRun, FimError, HashAlgorithm, IntegrityEngine,
    SchedulerState, Sleeper,
};
use std::{
    fs,
    future::Future,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

/// Returns immediately and records every requested pause.
#[derive(Clone, Default)]
struct InstantSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl Sleeper for InstantSleeper {
    fn sleep(&self, period: Duration) -> impl Future<Output = ()> + Send {
        self.calls.lock().unwrap().push(period);
        std::future::ready(())
    }
}

/// Raises the cancel signal as soon as the loop starts sleeping.
struct CancellingSleeper {
    cancel: CancellationToken,
}

impl Sleeper for CancellingSleeper {
    fn sleep(&self, _period: Duration) -> impl Future<Output = ()> + Send {
        self.cancel.cancel();
        std::future::pending::<()>()
    }
}

fn engine_for(root: &Path) -> IntegrityEngine {
    IntegrityEngine::new(EngineSettings {
        monitor_paths: vec![root.to_path_buf()],
        exclude: vec![],
        algorithm: HashAlgorithm::Sha256,
        workers: 2,
    })
    .unwrap()
}

#[tokio::test]
async fn cancel_during_sleep_stops_without_new_scan() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a"), "A").unwrap();
    let engine = engine_for(dir.path());
    let baseline = Baseline::create(engine.snapshot().await.unwrap());

    let cancel = CancellationToken::new();
    let sleeper = CancellingSleeper { cancel: cancel.clone() };
    let mut run = ContinuousRun::new(&engine, baseline, Duration::from_secs(3600), cancel, sleeper);
    assert_eq!(run.state(), SchedulerState::Idle);

    let first = run.next().await.unwrap().unwrap();
    assert!(first.is_clean());
    assert_eq!(run.state(), SchedulerState::Sleeping);

    assert!(run.next().await.is_none());
    assert_eq!(run.state(), SchedulerState::Stopped);
    assert_eq!(run.cycles(), 1);
    assert!(run.next().await.is_none());
}

#[tokio::test]
async fn cancelled_before_start_never_scans() {
    let dir = tempdir().unwrap();
    let engine = engine_for(dir.path());
    let baseline = Baseline::create(engine.snapshot().await.unwrap());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut run = ContinuousRun::new(&engine, baseline, Duration::from_secs(1), cancel, InstantSleeper::default());
    assert!(run.next().await.is_none());
    assert_eq!(run.cycles(), 0);
    assert_eq!(run.state(), SchedulerState::Stopped);
}

#[tokio::test]
async fn repeats_at_interval_and_sees_changes() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a");
    fs::write(&a, "one").unwrap();
    let engine = engine_for(dir.path());
    let baseline = Baseline::create(engine.snapshot().await.unwrap());

    let sleeper = InstantSleeper::default();
    let calls = sleeper.calls.clone();
    let interval = Duration::from_secs(42);
    let mut run = ContinuousRun::new(&engine, baseline, interval, CancellationToken::new(), sleeper);

    assert!(run.next().await.unwrap().unwrap().is_clean());
    fs::write(&a, "two").unwrap();
    let second = run.next().await.unwrap().unwrap();
    assert_eq!(second.modified.len(), 1);
    // the baseline is never updated implicitly
    let third = run.next().await.unwrap().unwrap();
    assert_eq!(third.modified.len(), 1);

    assert_eq!(run.cycles(), 3);
    assert_eq!(*calls.lock().unwrap(), vec![interval, interval]);
}

#[tokio::test]
async fn explicit_rebaseline_between_cycles() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a"), "one").unwrap();
    let engine = engine_for(dir.path());
    let baseline = Baseline::create(engine.snapshot().await.unwrap());
    let mut run = ContinuousRun::new(&engine, baseline, Duration::from_secs(1), CancellationToken::new(), InstantSleeper::default());

    fs::write(dir.path().join("b"), "new").unwrap();
    assert_eq!(run.next().await.unwrap().unwrap().added.len(), 1);

    let refreshed = Baseline::create(engine.snapshot().await.unwrap());
    let old = run.replace_baseline(refreshed);
    assert_eq!(old.len(), 1);
    assert_eq!(run.baseline().len(), 2);
    assert!(run.next().await.unwrap().unwrap().is_clean());
}

#[tokio::test]
async fn fatal_cycle_error_stops_the_loop() {
    let dir = tempdir().unwrap();
    let watched = dir.path().join("watched");
    fs::create_dir(&watched).unwrap();
    fs::write(watched.join("a"), "A").unwrap();
    let engine = engine_for(&watched);
    let baseline = Baseline::create(engine.snapshot().await.unwrap());

    fs::remove_dir_all(&watched).unwrap();
    let mut run = ContinuousRun::new(&engine, baseline, Duration::from_secs(1), CancellationToken::new(), InstantSleeper::default());
    match run.next().await {
        Some(Err(FimError::NoTargets(_))) => {}
        other => panic!("expected NoTargets, got {other:?}"),
    }
    assert_eq!(run.state(), SchedulerState::Stopped);
    assert!(run.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn tokio_timer_run_stops_on_cancel() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a"), "A").unwrap();
    let engine = engine_for(dir.path());
    let baseline = Baseline::create(engine.snapshot().await.unwrap());

    let cancel = CancellationToken::new();
    let mut run = run_continuous(&engine, baseline, Duration::from_secs(60), cancel.clone());
    assert!(run.next().await.unwrap().unwrap().is_clean());

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
    });
    assert!(run.next().await.is_none());
    assert_eq!(run.cycles(), 1);
    trigger.await.unwrap();
}
