use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use gcmx_core::bridge::{RingFull, SpscRing};
use gcmx_core::{EngineConfig, ExecutionMode, GcmXError, Result};
use gcmx_crypto::{seal_frame, GcmCipher, KeyMaterial, NONCE_LEN, SUPPORTED_TAG_SIZES};

use crate::engine::{Completion, EncryptTask, EncryptionEngine, EngineCapabilities, KeyId};

const WORKER_PARK: Duration = Duration::from_millis(1);

struct Job {
    cipher: Arc<GcmCipher>,
    task: EncryptTask,
}

fn execute(job: &Job) -> Completion {
    let task = &job.task;
    // # Safety: the submitter pins both descriptors until this completion is
    // reaped, and the harness drains before any region is stopped. Source and
    // destination come from distinct regions.
    let (src, dst) = unsafe { (task.src.as_slice(), task.dst.as_mut_slice()) };
    match seal_frame(&*job.cipher, &task.iv, task.aad_size, task.tag_size, src, dst) {
        Ok(written) => Completion::success(task.id, written),
        Err(e) => Completion::failed(task.id, e.status_code(), e.to_string()),
    }
}

struct WorkerShared {
    submissions: SpscRing<Job>,
    completions: SpscRing<Completion>,
    draining: AtomicBool,
}

struct OffloadWorker {
    shared: Arc<WorkerShared>,
    handle: Option<JoinHandle<()>>,
}

impl OffloadWorker {
    fn spawn(depth: usize, core: Option<usize>) -> Result<Self> {
        let shared = Arc::new(WorkerShared {
            submissions: SpscRing::new(depth),
            completions: SpscRing::new(depth),
            draining: AtomicBool::new(false),
        });
        let worker_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("gcmx-engine-0".to_string())
            .spawn(move || worker_loop(&worker_shared, core))
            .map_err(|e| GcmXError::ResourceAllocation(format!("engine worker: {e}")))?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    fn wake(&self) {
        if let Some(handle) = &self.handle {
            handle.thread().unpark();
        }
    }

    fn request_drain(&self) {
        self.shared.draining.store(true, Ordering::Release);
        self.wake();
    }

    fn join(&mut self) {
        self.request_drain();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("SoftwareEngine: worker thread panicked");
            }
        }
    }
}

fn worker_loop(shared: &WorkerShared, core: Option<usize>) {
    if let Some(core) = core {
        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        if let Some(id) = core_ids.get(core) {
            core_affinity::set_for_current(*id);
            tracing::info!("SoftwareEngine worker pinned to core {}", core);
        }
    }

    loop {
        match shared.submissions.pop() {
            Some(job) => {
                let mut completion = execute(&job);
                // The submitter never has more than `depth` tasks outstanding, so
                // this only spins if the harness stopped reaping.
                while let Err(RingFull(back)) = shared.completions.try_push(completion) {
                    completion = back;
                    std::thread::yield_now();
                }
            }
            None if shared.draining.load(Ordering::Acquire) => {
                if shared.submissions.is_empty() {
                    break;
                }
            }
            None => std::thread::park_timeout(WORKER_PARK),
        }
    }
    tracing::debug!("SoftwareEngine worker drained");
}

/// AES-GCM engine backed by the RustCrypto `aes-gcm` crate.
///
/// ## Execution Modes
/// - `Inline`: queued tasks execute one per `poll` on the caller's thread.
/// - `Offload`: a dedicated worker (optionally core-pinned) executes tasks and
///   hands completions back over an SPSC ring, as an accelerator queue would.
pub struct SoftwareEngine {
    mode: ExecutionMode,
    caps: EngineCapabilities,
    worker_core: Option<usize>,
    keys: HashMap<KeyId, Arc<GcmCipher>>,
    next_key: u32,
    running: bool,
    in_flight: usize,
    inline_queue: VecDeque<Job>,
    worker: Option<OffloadWorker>,
}

impl SoftwareEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            mode: config.mode,
            caps: EngineCapabilities {
                max_buffer_size: config.max_buffer_size,
                max_aad_size: config.max_aad_size,
                iv_len: NONCE_LEN,
                tag_sizes: &SUPPORTED_TAG_SIZES,
                queue_depth: config.queue_depth.max(1).next_power_of_two(),
            },
            worker_core: config.worker_core,
            keys: HashMap::new(),
            next_key: 1,
            running: false,
            in_flight: 0,
            inline_queue: VecDeque::new(),
            worker: None,
        }
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    fn join_worker_if_drained(&mut self) {
        if self.running || self.in_flight > 0 {
            return;
        }
        if let Some(mut worker) = self.worker.take() {
            worker.join();
        }
    }
}

impl EncryptionEngine for SoftwareEngine {
    fn name(&self) -> &str {
        match self.mode {
            ExecutionMode::Inline => "software-inline",
            ExecutionMode::Offload => "software-offload",
        }
    }

    fn capabilities(&self) -> EngineCapabilities {
        self.caps.clone()
    }

    fn start(&mut self) -> Result<()> {
        if self.running || self.worker.is_some() {
            return Err(GcmXError::ContextLifecycle(format!(
                "{} is already running",
                self.name()
            )));
        }
        if self.mode == ExecutionMode::Offload {
            self.worker = Some(OffloadWorker::spawn(self.caps.queue_depth, self.worker_core)?);
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Err(GcmXError::ContextLifecycle(format!("{} is not running", self.name())));
        }
        self.running = false;
        if let Some(worker) = &self.worker {
            worker.request_drain();
        }
        self.join_worker_if_drained();
        Ok(())
    }

    fn create_key(&mut self, key: &KeyMaterial) -> Result<KeyId> {
        let cipher = GcmCipher::new(key)?;
        let id = KeyId(self.next_key);
        self.next_key += 1;
        self.keys.insert(id, Arc::new(cipher));
        tracing::debug!("{}: created AES-{} key {:?}", self.name(), key.key_type().bits(), id);
        Ok(id)
    }

    fn destroy_key(&mut self, key: KeyId) -> Result<()> {
        self.keys
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| GcmXError::InvalidArgument(format!("unknown key {key:?}")))
    }

    fn submit_encrypt(&mut self, task: EncryptTask) -> Result<()> {
        if !self.running {
            return Err(GcmXError::ContextLifecycle(format!(
                "{} does not accept tasks after stop",
                self.name()
            )));
        }
        if self.in_flight >= self.caps.queue_depth {
            return Err(GcmXError::ResourceAllocation(format!(
                "submission queue full ({} in flight)",
                self.in_flight
            )));
        }
        let cipher = self
            .keys
            .get(&task.key)
            .cloned()
            .ok_or_else(|| GcmXError::InvalidArgument(format!("unknown key {:?}", task.key)))?;
        let job = Job { cipher, task };

        match &self.worker {
            Some(worker) => {
                worker
                    .shared
                    .submissions
                    .try_push(job)
                    .map_err(|_| GcmXError::ResourceAllocation("submission ring full".to_string()))?;
                worker.wake();
            }
            None => self.inline_queue.push_back(job),
        }
        self.in_flight += 1;
        Ok(())
    }

    fn poll(&mut self) -> Option<Completion> {
        let completion = match &self.worker {
            Some(worker) => worker.shared.completions.pop(),
            None => self.inline_queue.pop_front().map(|job| execute(&job)),
        }?;
        self.in_flight -= 1;
        self.join_worker_if_drained();
        Some(completion)
    }

    fn in_flight(&self) -> usize {
        self.in_flight
    }
}

impl Drop for SoftwareEngine {
    fn drop(&mut self) {
        if self.in_flight > 0 {
            tracing::warn!("SoftwareEngine dropped with {} task(s) in flight", self.in_flight);
        }
        if let Some(mut worker) = self.worker.take() {
            worker.join();
        }
    }
}
