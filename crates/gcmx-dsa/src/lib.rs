//! # gcmx-dsa: Engine-Visible Memory
//!
//! Host memory regions and the fixed-capacity descriptor inventory that the
//! encryption pipeline hands to its execution engine.

pub mod error;
pub mod pool;
pub mod region;

pub use error::MemError;
pub use pool::{BufferId, BufferPool, DmaWindow};
pub use region::{HostMemory, MemoryRegion};

static_assertions::assert_impl_all!(DmaWindow: Send, Sync, Copy);
static_assertions::assert_impl_all!(HostMemory: Send, Sync);
static_assertions::const_assert!(BufferPool::PIPELINE_BUFFERS == 2);
