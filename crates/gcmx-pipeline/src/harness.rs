use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use gcmx_core::{BenchConfig, GcmXError, OutputSink, Result, TeardownLog};
use gcmx_crypto::KeyMaterial;
use gcmx_dsa::{BufferId, BufferPool, HostMemory, MemoryRegion};

use crate::backoff::IdleStrategy;
use crate::context::{ContextState, ExecutionContext};
use crate::engine::{EncryptionEngine, KeyId};
use crate::pump::{CompletionPump, PumpStats};
use crate::submitter::{EncryptParams, OperationSubmitter};

const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessState {
    Init,
    ResourcesReady,
    ContextStarted,
    Looping,
    Draining,
    Stopped,
    Reported,
}

#[derive(Debug, Clone)]
pub struct HarnessSettings {
    pub key: KeyMaterial,
    pub iv: Vec<u8>,
    pub tag_size: usize,
    pub aad_size: usize,
    /// Wall-clock window of the loop, measured from the first iteration.
    pub duration: Duration,
    pub poll_interval: Duration,
}

impl HarnessSettings {
    pub fn from_config(config: &BenchConfig) -> Result<Self> {
        Ok(Self {
            key: config.key_material()?,
            iv: config.iv()?,
            tag_size: config.tag_size,
            aad_size: config.aad_size,
            duration: config.duration(),
            poll_interval: config.poll_interval(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ThroughputReport {
    pub iterations: u64,
    /// Sum of the destination data length over completed iterations.
    pub total_bytes: u64,
    pub elapsed: Duration,
    pub throughput_mib_s: f64,
    /// Length of the persisted output (last iteration only).
    pub output_len: usize,
    pub output_path: Option<PathBuf>,
    pub cancelled: bool,
    pub pump: PumpStats,
}

impl ThroughputReport {
    pub fn compute_throughput(total_bytes: u64, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        total_bytes as f64 / MIB / secs
    }
}

/// Everything acquired during a run, released in reverse order on every exit path.
#[derive(Default)]
struct Resources {
    src_region: Option<MemoryRegion>,
    src_buf: Option<BufferId>,
    dst_region: Option<MemoryRegion>,
    dst_buf: Option<BufferId>,
    key: Option<KeyId>,
}

fn stage_region<'r>(
    slot: &'r mut Option<MemoryRegion>,
    label: &'static str,
    memory: HostMemory,
) -> Result<&'r MemoryRegion> {
    let region = slot.insert(MemoryRegion::create(label, memory.len()));
    region.bind(memory)?;
    region.start()?;
    Ok(region)
}

fn retire_region(mut region: MemoryRegion) -> Result<()> {
    if region.is_started() {
        region.stop()?;
    }
    Ok(())
}

/// Time-bounded AES-GCM throughput run over one reused pair of descriptors.
///
/// ## Flow
/// `Init → ResourcesReady → ContextStarted → Looping → Draining → Stopped → Reported`.
/// Any failure jumps to teardown, which quiesces the context first and then
/// releases whatever was acquired in reverse order.
pub struct ThroughputHarness<'a, E: EncryptionEngine> {
    ctx: &'a mut ExecutionContext<E>,
    settings: HarnessSettings,
    pump: CompletionPump,
    cancel: Option<&'a AtomicBool>,
    state: HarnessState,
}

impl<'a, E: EncryptionEngine> ThroughputHarness<'a, E> {
    pub fn new(ctx: &'a mut ExecutionContext<E>, settings: HarnessSettings) -> Self {
        let pump = CompletionPump::with_poll_interval(settings.poll_interval);
        Self {
            ctx,
            settings,
            pump,
            cancel: None,
            state: HarnessState::Init,
        }
    }

    pub fn with_idle_strategy(mut self, idle: Box<dyn IdleStrategy>) -> Self {
        self.pump = CompletionPump::new(idle);
        self
    }

    /// Ends the loop early once `flag` is raised. Checked once per iteration.
    pub fn with_cancel_flag(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn state(&self) -> HarnessState {
        self.state
    }

    /// Runs the benchmark over `plaintext` and commits the last ciphertext to `sink`.
    ///
    /// The sink is only committed when the run and its teardown both succeed.
    pub fn run(&mut self, plaintext: &[u8], mut sink: OutputSink) -> Result<ThroughputReport> {
        let mut pool = BufferPool::new(BufferPool::PIPELINE_BUFFERS);
        let mut res = Resources::default();

        let outcome = self.execute(plaintext, &mut pool, &mut res, &mut sink);
        if let Err(e) = &outcome {
            tracing::error!("run aborted in state {:?}: {}", self.state, e);
        }

        let mut log = TeardownLog::new();
        self.teardown(&mut pool, res, &mut log);
        let mut report = log.finish(outcome)?;

        report.output_path = Some(sink.commit()?);
        self.transition(HarnessState::Reported);
        Ok(report)
    }

    fn execute(
        &mut self,
        plaintext: &[u8],
        pool: &mut BufferPool,
        res: &mut Resources,
        sink: &mut OutputSink,
    ) -> Result<ThroughputReport> {
        if plaintext.is_empty() {
            return Err(GcmXError::InvalidArgument("plaintext is empty".to_string()));
        }
        let HarnessSettings {
            iv,
            tag_size,
            aad_size,
            duration,
            ..
        } = &self.settings;
        let (tag_size, aad_size, duration) = (*tag_size, *aad_size, *duration);
        let out_capacity = plaintext.len() + tag_size;
        let submitter_params = EncryptParams::new(iv, tag_size, aad_size);

        let src = stage_region(&mut res.src_region, "src", HostMemory::from_bytes(plaintext)?)?;
        let src_buf = *res.src_buf.insert(pool.acquire(src, 0, plaintext.len())?);
        let dst = stage_region(&mut res.dst_region, "dst", HostMemory::allocate(out_capacity)?)?;
        let dst_buf = *res.dst_buf.insert(pool.acquire(dst, 0, out_capacity)?);
        let key = *res.key.insert(self.ctx.create_key(&self.settings.key)?);
        self.transition(HarnessState::ResourcesReady);

        self.ctx.start()?;
        self.transition(HarnessState::ContextStarted);
        self.ctx.ensure_fits(plaintext.len())?;

        let mut submitter = OperationSubmitter::new(submitter_params);
        let mut iterations = 0u64;
        let mut total_bytes = 0u64;
        let mut cancelled = false;
        self.transition(HarnessState::Looping);
        tracing::info!(
            "encrypting {} bytes per task on {} for {:?}",
            plaintext.len(),
            self.ctx.device(),
            duration
        );

        let started = Instant::now();
        let elapsed = loop {
            pool.set_data(src_buf, 0, plaintext.len())?;
            pool.reset_data_len(dst_buf)?;

            let op = submitter.submit_encrypt(self.ctx, pool, src_buf, dst_buf, key)?;
            submitter.wait(op, self.ctx, &mut self.pump, pool)?;
            total_bytes += pool.data_len(dst_buf)? as u64;
            iterations += 1;
            tracing::trace!("iteration {} complete, {} bytes so far", iterations, total_bytes);

            let elapsed = started.elapsed();
            if elapsed >= duration {
                break elapsed;
            }
            if self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                tracing::warn!("cancellation requested after {} iteration(s)", iterations);
                cancelled = true;
                break elapsed;
            }
        };

        self.transition(HarnessState::Draining);
        self.ctx.stop()?;
        self.pump.drain(self.ctx)?;
        self.transition(HarnessState::Stopped);

        let throughput_mib_s = ThroughputReport::compute_throughput(total_bytes, elapsed);
        tracing::info!(
            "{} iteration(s), {} bytes in {:.3}s: {:.2} MB/s",
            iterations,
            total_bytes,
            elapsed.as_secs_f64(),
            throughput_mib_s
        );

        pool.with_data(dst_buf, |data| sink.write_all(data))??;
        Ok(ThroughputReport {
            iterations,
            total_bytes,
            elapsed,
            throughput_mib_s,
            output_len: pool.data_len(dst_buf)?,
            output_path: None,
            cancelled,
            pump: self.pump.stats(),
        })
    }

    fn teardown(&mut self, pool: &mut BufferPool, mut res: Resources, log: &mut TeardownLog) {
        if self.ctx.state() == ContextState::Started {
            log.record("context stop", self.ctx.stop());
        }
        if self.ctx.state() == ContextState::Stopped && !self.ctx.is_idle() {
            log.record("context drain", self.pump.drain(self.ctx).map(drop));
        }

        if let Some(key) = res.key.take() {
            log.record("key destroy", self.ctx.destroy_key(key));
        }
        if let Some(id) = res.dst_buf.take() {
            log.record("dst buffer release", pool.release(id).map_err(Into::into));
        }
        if let Some(region) = res.dst_region.take() {
            log.record("dst region stop", retire_region(region));
        }
        if let Some(id) = res.src_buf.take() {
            log.record("src buffer release", pool.release(id).map_err(Into::into));
        }
        if let Some(region) = res.src_region.take() {
            log.record("src region stop", retire_region(region));
        }
        log.record("context destroy", self.ctx.destroy());
    }

    fn transition(&mut self, next: HarnessState) {
        tracing::debug!("harness: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
