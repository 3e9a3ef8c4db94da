// ============================================================================
// kvtraffic Library
// ============================================================================

pub mod binspec;
pub mod core;
pub mod mutation;
pub mod rotation;
pub mod seed;
pub mod store;
pub mod workload;

// Re-export main types for convenience
pub use binspec::{BinSpecs, CompiledOperation, compile, compile_with};
pub use crate::core::{Result, Value, WorkloadError};
pub use mutation::MutationExecutor;
pub use rotation::{RotationOutcome, Rotator, TimeWindow};
pub use store::{Key, MemoryStore, Record, Store, StoreConfig};

// Re-export dispatch API
pub use workload::{
    AdmissionPool, AdmissionSlot, CycleController, DispatchState, Dispatcher, QueryConfig,
    WorkerPool, WorkloadConfig, WorkloadMix,
};
