//! # gcmx-core
//!
//! Shared vocabulary of the benchmark: the error taxonomy, configuration,
//! payload and output I/O, and the SPSC ring used between the harness and an
//! offloading engine.

pub mod bridge;
pub mod config;
pub mod error;
pub mod payload;

pub use bridge::{RingFull, SpscRing};
pub use config::{BenchConfig, EngineConfig, ExecutionMode};
pub use error::{check_cancelled, ErrorCategory, GcmXError, Result, TeardownLog};
pub use payload::{generate_random_payload, parse_size, read_payload, OutputSink};

static_assertions::assert_impl_all!(SpscRing<u64>: Send, Sync);
static_assertions::assert_impl_all!(GcmXError: Send, Sync);
