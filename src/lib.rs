pub mod alert;
pub mod baseline;
pub mod config;
pub mod diff;
pub mod enumerate;
pub mod error;
pub mod fim;
pub mod hasher;
pub mod metrics;
pub mod report;
pub mod scheduler;

pub use baseline::{open_store, Baseline, BaselineStore, FileRecord, Snapshot};
pub use diff::{compare, DiffResult};
pub use error::FimError;
pub use fim::{EngineSettings, IntegrityEngine};
pub use hasher::HashAlgorithm;
pub use scheduler::{run_continuous, run_once, ContinuousRun, SchedulerState, Sleeper};
