//! # gcmx-pipeline: Engine Boundary
//!
//! Everything the pipeline needs from an AES-GCM execution engine, and nothing more.
//! An engine may execute inline, on a worker thread, or on an accelerator; the
//! pipeline only ever observes results through [`EncryptionEngine::poll`].

use std::sync::Arc;

use gcmx_core::Result;
use gcmx_crypto::KeyMaterial;
use gcmx_dsa::DmaWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

/// Engine-side handle of an expanded key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId(pub u32);

/// One AES-GCM encryption over registered memory.
///
/// `dst` is the tail room of the destination descriptor; the engine writes
/// `aad || ciphertext || tag` at its start.
#[derive(Debug, Clone)]
pub struct EncryptTask {
    pub id: TaskId,
    pub key: KeyId,
    pub src: DmaWindow,
    pub dst: DmaWindow,
    pub iv: Arc<[u8]>,
    pub tag_size: usize,
    pub aad_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionStatus {
    Success,
    Failed { code: i32, description: String },
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub task: TaskId,
    pub status: CompletionStatus,
    /// Bytes written into the destination window.
    pub produced_len: usize,
}

impl Completion {
    pub fn success(task: TaskId, produced_len: usize) -> Self {
        Self {
            task,
            status: CompletionStatus::Success,
            produced_len,
        }
    }

    pub fn failed(task: TaskId, code: i32, description: impl Into<String>) -> Self {
        Self {
            task,
            status: CompletionStatus::Failed {
                code,
                description: description.into(),
            },
            produced_len: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CompletionStatus::Success
    }
}

#[derive(Debug, Clone)]
pub struct EngineCapabilities {
    pub max_buffer_size: usize,
    pub max_aad_size: usize,
    pub iv_len: usize,
    pub tag_sizes: &'static [usize],
    pub queue_depth: usize,
}

pub trait EncryptionEngine: Send {
    fn name(&self) -> &str;

    fn capabilities(&self) -> EngineCapabilities;

    fn start(&mut self) -> Result<()>;

    /// Requests a drain. Tasks already submitted keep completing through `poll`.
    fn stop(&mut self) -> Result<()>;

    fn create_key(&mut self, key: &KeyMaterial) -> Result<KeyId>;

    fn destroy_key(&mut self, key: KeyId) -> Result<()>;

    /// Enqueues a task. Never blocks and never reports the task outcome.
    fn submit_encrypt(&mut self, task: EncryptTask) -> Result<()>;

    /// Non-blocking. Returns at most one completion.
    fn poll(&mut self) -> Option<Completion>;

    /// Tasks submitted whose completion has not yet been returned by `poll`.
    fn in_flight(&self) -> usize;
}
