use crate::pool::BufferId;

/// Failures raised while allocating, registering or addressing engine-visible memory.
#[derive(Debug, thiserror::Error)]
pub enum MemError {
    #[error("failed to map {requested} bytes of host memory: {reason}")]
    Allocation { requested: usize, reason: String },

    #[error("region registration failed: {0}")]
    Registration(String),

    #[error("buffer inventory exhausted: all {capacity} descriptors are outstanding")]
    CapacityExceeded { capacity: usize },

    #[error("window [{offset}, {offset}+{len}) exceeds capacity of {capacity} bytes")]
    OutOfRange {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("buffer descriptor {0:?} is stale or was never acquired")]
    StaleBuffer(BufferId),

    #[error("memory region {0} backing the descriptor has been freed")]
    RegionGone(u64),
}
