//! Admission-controlled dispatch of the task mix.

pub mod admission;
pub mod config;
pub mod dispatcher;
pub mod pool;
pub mod task;

pub use admission::{AdmissionPool, AdmissionSlot, AdmissionStats};
pub use config::{QueryConfig, WorkloadConfig, WorkloadMix};
pub use dispatcher::{CycleController, DispatchState, Dispatcher, PlannedBatch};
pub use pool::WorkerPool;
pub use task::{Task, TaskContext, TaskKind};
