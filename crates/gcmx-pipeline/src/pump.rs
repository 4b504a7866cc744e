use std::collections::HashMap;
use std::time::Duration;

use gcmx_core::{GcmXError, Result};

use crate::backoff::{IdleStrategy, SleepIdle};
use crate::context::{ContextState, ExecutionContext};
use crate::engine::{Completion, EncryptionEngine, TaskId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub polls: u64,
    pub idle_polls: u64,
    pub completions: u64,
}

/// The single progress loop of a run.
///
/// Completions are parked by task id until their submitter asks for them, so
/// nothing is lost if the engine returns them out of order.
pub struct CompletionPump {
    idle: Box<dyn IdleStrategy>,
    ready: HashMap<TaskId, Completion>,
    stats: PumpStats,
}

impl CompletionPump {
    pub fn new(idle: Box<dyn IdleStrategy>) -> Self {
        Self {
            idle,
            ready: HashMap::new(),
            stats: PumpStats::default(),
        }
    }

    pub fn with_poll_interval(interval: Duration) -> Self {
        Self::new(Box::new(SleepIdle::new(interval)))
    }

    pub fn stats(&self) -> PumpStats {
        self.stats
    }

    /// Completions received but not yet claimed.
    pub fn parked(&self) -> usize {
        self.ready.len()
    }

    /// One non-blocking poll. Returns `false` if nothing progressed.
    pub fn pump_once<E: EncryptionEngine>(&mut self, ctx: &mut ExecutionContext<E>) -> bool {
        self.stats.polls += 1;
        match ctx.poll() {
            Some(completion) => {
                self.stats.completions += 1;
                self.ready.insert(completion.task, completion);
                true
            }
            None => {
                self.stats.idle_polls += 1;
                false
            }
        }
    }

    /// Pumps until the completion of `task` is observed.
    pub fn wait_for<E: EncryptionEngine>(
        &mut self,
        ctx: &mut ExecutionContext<E>,
        task: TaskId,
    ) -> Result<Completion> {
        let mut misses = 0u32;
        loop {
            if let Some(completion) = self.ready.remove(&task) {
                return Ok(completion);
            }
            if self.pump_once(ctx) {
                misses = 0;
                continue;
            }
            if ctx.in_flight() == 0 {
                return Err(GcmXError::ContextLifecycle(format!(
                    "task {} is not in flight on {} and never completed",
                    task.0,
                    ctx.device()
                )));
            }
            misses = misses.saturating_add(1);
            self.idle.idle(misses);
        }
    }

    /// Pumps a stopped context until nothing is in flight.
    ///
    /// Completions nobody claimed are logged and returned to the caller.
    pub fn drain<E: EncryptionEngine>(
        &mut self,
        ctx: &mut ExecutionContext<E>,
    ) -> Result<Vec<Completion>> {
        if ctx.state() == ContextState::Started {
            return Err(GcmXError::ContextLifecycle(format!(
                "drain of {} requested before stop",
                ctx.device()
            )));
        }
        let mut misses = 0u32;
        while !ctx.is_idle() {
            if self.pump_once(ctx) {
                misses = 0;
            } else {
                misses = misses.saturating_add(1);
                self.idle.idle(misses);
            }
        }

        let stray: Vec<Completion> = self.ready.drain().map(|(_, c)| c).collect();
        for completion in &stray {
            tracing::warn!(
                "drain: discarding unclaimed completion of task {} ({:?})",
                completion.task.0,
                completion.status
            );
        }
        Ok(stray)
    }
}
