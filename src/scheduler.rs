//! One-shot and continuous scan driving.
//!
//! [`ContinuousRun`] is a pull-based state machine:
//!
//! ```text
//! Idle -> Scanning -> Sleeping -> Scanning -> ... -> Stopped
//! ```
//!
//! Cancellation is observed while sleeping and right after each scan. A scan
//! that has started always runs to completion.

use crate::baseline::Baseline;
use crate::diff::DiffResult;
use crate::error::Result;
use crate::fim::IntegrityEngine;
use std::{future::Future, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scanning,
    Sleeping,
    Stopped,
}

/// Waits between cycles. Injectable so tests never touch the wall clock.
pub trait Sleeper {
    fn sleep(&self, period: Duration) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, period: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(period)
    }
}

/// Single check against `baseline`.
pub async fn run_once(engine: &IntegrityEngine, baseline: &Baseline) -> Result<DiffResult> {
    engine.check(baseline).await
}

/// Start a continuous run with the tokio timer.
pub fn run_continuous(
    engine: &IntegrityEngine,
    baseline: Baseline,
    interval: Duration,
    cancel: CancellationToken,
) -> ContinuousRun<'_, TokioSleeper> {
    ContinuousRun::new(engine, baseline, interval, cancel, TokioSleeper)
}

/// Lazy, infinite sequence of check results. Restart by building a new one.
pub struct ContinuousRun<'e, S> {
    engine: &'e IntegrityEngine,
    baseline: Baseline,
    interval: Duration,
    cancel: CancellationToken,
    sleeper: S,
    state: SchedulerState,
    cycles: u64,
}

impl<'e, S: Sleeper> ContinuousRun<'e, S> {
    pub fn new(
        engine: &'e IntegrityEngine,
        baseline: Baseline,
        interval: Duration,
        cancel: CancellationToken,
        sleeper: S,
    ) -> Self {
        Self {
            engine,
            baseline,
            interval,
            cancel,
            sleeper,
            state: SchedulerState::Idle,
            cycles: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Completed scans so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    /// Swap in a new baseline between cycles; returns the previous one.
    pub fn replace_baseline(&mut self, baseline: Baseline) -> Baseline {
        info!("baseline replaced ({} files)", baseline.len());
        std::mem::replace(&mut self.baseline, baseline)
    }

    /// Advance to the next completed scan.
    ///
    /// `None` once Stopped. A fatal cycle error is yielded once, after which
    /// the run is Stopped; per-file errors live inside the `DiffResult`.
    pub async fn next(&mut self) -> Option<Result<DiffResult>> {
        loop {
            match self.state {
                SchedulerState::Stopped => return None,
                SchedulerState::Idle => {
                    if self.stop_if_cancelled() {
                        return None;
                    }
                    self.state = SchedulerState::Scanning;
                }
                SchedulerState::Sleeping => {
                    debug!("sleeping {:?} before next scan", self.interval);
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {}
                        _ = self.sleeper.sleep(self.interval) => {}
                    }
                    if self.stop_if_cancelled() {
                        return None;
                    }
                    self.state = SchedulerState::Scanning;
                }
                SchedulerState::Scanning => {
                    let result = self.engine.check(&self.baseline).await;
                    self.cycles += 1;
                    match &result {
                        Ok(_) => {
                            if !self.stop_if_cancelled() {
                                self.state = SchedulerState::Sleeping;
                            }
                        }
                        Err(e) => {
                            warn!("scan cycle failed, stopping: {e}");
                            self.state = SchedulerState::Stopped;
                        }
                    }
                    return Some(result);
                }
            }
        }
    }

    fn stop_if_cancelled(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            info!("monitoring stopped after {} cycles", self.cycles);
            self.state = SchedulerState::Stopped;
            true
        } else {
            false
        }
    }
}
