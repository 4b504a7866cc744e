//! # gcmx-pipeline: Buffer-Lifecycle-Managed Encryption Pipeline
//!
//! ## Mechanical Sympathy
//! - **One Descriptor Pair**: the source and destination descriptors are acquired once
//!   and reset in place every iteration. No allocation on the hot path.
//! - **Cooperative Polling**: the caller never blocks on a task; it polls and applies
//!   an [`IdleStrategy`] when nothing progressed.
//! - **Drain Before Teardown**: no region is stopped while the engine may still touch it.

pub mod backoff;
pub mod context;
pub mod engine;
pub mod harness;
pub mod pump;
pub mod software;
pub mod submitter;

pub use backoff::{idle_strategy_for, BusySpin, IdleStrategy, SleepIdle, SpinThenSleep};
pub use context::{ContextState, ExecutionContext};
pub use engine::{
    Completion, CompletionStatus, EncryptTask, EncryptionEngine, EngineCapabilities, KeyId, TaskId,
};
pub use harness::{HarnessSettings, HarnessState, ThroughputHarness, ThroughputReport};
pub use pump::{CompletionPump, PumpStats};
pub use software::SoftwareEngine;
pub use submitter::{EncryptParams, OperationSubmitter, PendingOp};
