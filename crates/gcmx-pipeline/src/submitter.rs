use std::sync::Arc;

use gcmx_core::{GcmXError, Result};
use gcmx_dsa::{BufferId, BufferPool};

use crate::context::ExecutionContext;
use crate::engine::{CompletionStatus, EncryptTask, EncryptionEngine, KeyId, TaskId};
use crate::pump::CompletionPump;

/// Per-run task parameters shared by every submission.
#[derive(Debug, Clone)]
pub struct EncryptParams {
    pub iv: Arc<[u8]>,
    pub tag_size: usize,
    pub aad_size: usize,
}

impl EncryptParams {
    pub fn new(iv: &[u8], tag_size: usize, aad_size: usize) -> Self {
        Self {
            iv: Arc::from(iv),
            tag_size,
            aad_size,
        }
    }
}

/// A submitted task whose descriptors are pinned until [`OperationSubmitter::wait`].
#[derive(Debug)]
#[must_use = "a pending operation keeps both descriptors pinned until waited on"]
pub struct PendingOp {
    task: TaskId,
    src: BufferId,
    dst: BufferId,
}

impl PendingOp {
    pub fn task(&self) -> TaskId {
        self.task
    }
}

pub struct OperationSubmitter {
    params: EncryptParams,
    next_task: u64,
}

impl OperationSubmitter {
    pub fn new(params: EncryptParams) -> Self {
        Self {
            params,
            next_task: 1,
        }
    }

    /// Tasks handed to the engine so far.
    pub fn submitted(&self) -> u64 {
        self.next_task - 1
    }

    /// Validates, pins `src` and `dst`, and enqueues one encryption.
    ///
    /// The engine reads the valid data of `src` and writes into the tail room of `dst`.
    pub fn submit_encrypt<E: EncryptionEngine>(
        &mut self,
        ctx: &mut ExecutionContext<E>,
        pool: &mut BufferPool,
        src: BufferId,
        dst: BufferId,
        key: KeyId,
    ) -> Result<PendingOp> {
        let caps = ctx.capabilities();
        let EncryptParams {
            iv,
            tag_size,
            aad_size,
        } = &self.params;

        let src_len = pool.data_len(src)?;
        if src_len == 0 {
            return Err(GcmXError::InvalidArgument(
                "source descriptor holds no data".to_string(),
            ));
        }
        ctx.ensure_fits(src_len)?;
        let needed = src_len + tag_size;
        let room = pool.tailroom(dst)?;
        if room < needed {
            return Err(GcmXError::InvalidArgument(format!(
                "destination has {room} bytes of tail room, {needed} needed for ciphertext and tag"
            )));
        }
        if iv.len() != caps.iv_len {
            return Err(GcmXError::InvalidArgument(format!(
                "IV is {} bytes, engine requires {}",
                iv.len(),
                caps.iv_len
            )));
        }
        if !caps.tag_sizes.contains(tag_size) {
            return Err(GcmXError::InvalidArgument(format!(
                "tag size {tag_size} not in {:?}",
                caps.tag_sizes
            )));
        }
        if *aad_size > caps.max_aad_size || *aad_size > src_len {
            return Err(GcmXError::InvalidArgument(format!(
                "AAD size {aad_size} exceeds limit (engine max {}, input {src_len})",
                caps.max_aad_size
            )));
        }

        let id = TaskId(self.next_task);
        let task = EncryptTask {
            id,
            key,
            src: pool.source_window(src)?,
            dst: pool.sink_window(dst)?,
            iv: iv.clone(),
            tag_size: *tag_size,
            aad_size: *aad_size,
        };

        pool.pin(src)?;
        if let Err(e) = pool.pin(dst) {
            pool.unpin(src)?;
            return Err(e.into());
        }
        if let Err(e) = ctx.submit(task) {
            pool.unpin(dst)?;
            pool.unpin(src)?;
            return Err(e);
        }

        self.next_task += 1;
        tracing::trace!("submitted task {} ({} bytes)", id.0, src_len);
        Ok(PendingOp { task: id, src, dst })
    }

    /// Pumps until `op` completes, unpins its descriptors and records the output.
    ///
    /// On success `dst` grows by the produced length, which is returned. A failed
    /// task surfaces as `EncryptionTaskFailed` and is never resubmitted.
    pub fn wait<E: EncryptionEngine>(
        &mut self,
        op: PendingOp,
        ctx: &mut ExecutionContext<E>,
        pump: &mut CompletionPump,
        pool: &mut BufferPool,
    ) -> Result<usize> {
        let completion = pump.wait_for(ctx, op.task);
        let unpinned = pool.unpin(op.src).and_then(|()| pool.unpin(op.dst));
        let completion = completion?;
        unpinned?;

        match completion.status {
            CompletionStatus::Success => {
                pool.append_data(op.dst, completion.produced_len)?;
                Ok(completion.produced_len)
            }
            CompletionStatus::Failed { code, description } => {
                tracing::error!("task {} failed: {} ({})", op.task.0, description, code);
                Err(GcmXError::EncryptionTaskFailed {
                    task_id: op.task.0,
                    status: code,
                    description,
                })
            }
        }
    }
}
