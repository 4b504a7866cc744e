//! Shared rig for the pipeline tests: an engine double that delays and fails
//! tasks on request and records every call it sees.
#![allow(dead_code)]

use gcmx_core::{EngineConfig, ExecutionMode, Result};
use gcmx_crypto::KeyMaterial;
use gcmx_dsa::{BufferId, BufferPool, HostMemory, MemoryRegion};
use gcmx_pipeline::{
    Completion, EncryptTask, EncryptionEngine, EngineCapabilities, KeyId, SoftwareEngine,
};

pub const KEY_256: [u8; 32] = [0x42; 32];
pub const IV: [u8; 12] = [0x07; 12];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    Stop { in_flight: usize },
    CreateKey,
    DestroyKey { in_flight: usize },
    Submit(u64),
    Complete(u64),
}

/// Inline software engine that holds every completion back for `delay_polls`
/// empty polls and can fail one chosen task.
pub struct ScriptedEngine {
    inner: SoftwareEngine,
    delay_polls: u32,
    countdown: u32,
    fail_task: Option<u64>,
    pub events: Vec<Event>,
}

impl ScriptedEngine {
    pub fn new(config: &EngineConfig) -> Self {
        let config = EngineConfig {
            mode: ExecutionMode::Inline,
            ..config.clone()
        };
        Self {
            inner: SoftwareEngine::new(&config),
            delay_polls: 0,
            countdown: 0,
            fail_task: None,
            events: Vec::new(),
        }
    }

    pub fn delayed(mut self, polls: u32) -> Self {
        self.delay_polls = polls;
        self
    }

    pub fn failing(mut self, task: u64) -> Self {
        self.fail_task = Some(task);
        self
    }

    pub fn submissions(&self) -> usize {
        self.events.iter().filter(|e| matches!(e, Event::Submit(_))).count()
    }

    pub fn position(&self, wanted: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events.iter().position(wanted)
    }
}

impl EncryptionEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn capabilities(&self) -> EngineCapabilities {
        self.inner.capabilities()
    }

    fn start(&mut self) -> Result<()> {
        self.events.push(Event::Start);
        self.inner.start()
    }

    fn stop(&mut self) -> Result<()> {
        self.events.push(Event::Stop {
            in_flight: self.inner.in_flight(),
        });
        self.inner.stop()
    }

    fn create_key(&mut self, key: &KeyMaterial) -> Result<KeyId> {
        self.events.push(Event::CreateKey);
        self.inner.create_key(key)
    }

    fn destroy_key(&mut self, key: KeyId) -> Result<()> {
        self.events.push(Event::DestroyKey {
            in_flight: self.inner.in_flight(),
        });
        self.inner.destroy_key(key)
    }

    fn submit_encrypt(&mut self, task: EncryptTask) -> Result<()> {
        let id = task.id.0;
        self.inner.submit_encrypt(task)?;
        self.events.push(Event::Submit(id));
        self.countdown = self.delay_polls;
        Ok(())
    }

    fn poll(&mut self) -> Option<Completion> {
        if self.inner.in_flight() == 0 {
            return None;
        }
        if self.countdown > 0 {
            self.countdown -= 1;
            return None;
        }
        let mut completion = self.inner.poll()?;
        if self.fail_task == Some(completion.task.0) {
            completion = Completion::failed(completion.task, -5, "injected engine fault");
        }
        self.events.push(Event::Complete(completion.task.0));
        Some(completion)
    }

    fn in_flight(&self) -> usize {
        self.inner.in_flight()
    }
}

pub fn inline_config() -> EngineConfig {
    EngineConfig {
        mode: ExecutionMode::Inline,
        ..EngineConfig::default()
    }
}

pub fn key_256() -> KeyMaterial {
    KeyMaterial::from_raw(&KEY_256).unwrap()
}

pub fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Started source/destination regions with one descriptor each.
pub struct BufferRig {
    pub pool: BufferPool,
    pub src_region: MemoryRegion,
    pub dst_region: MemoryRegion,
    pub src: BufferId,
    pub dst: BufferId,
}

impl BufferRig {
    pub fn new(plaintext: &[u8], dst_capacity: usize) -> Self {
        let mut src_region = MemoryRegion::create("src", plaintext.len());
        src_region.bind(HostMemory::from_bytes(plaintext).unwrap()).unwrap();
        src_region.start().unwrap();

        let mut dst_region = MemoryRegion::create("dst", dst_capacity);
        dst_region.bind(HostMemory::allocate(dst_capacity).unwrap()).unwrap();
        dst_region.start().unwrap();

        let mut pool = BufferPool::new(BufferPool::PIPELINE_BUFFERS);
        let src = pool.acquire(&src_region, 0, plaintext.len()).unwrap();
        let dst = pool.acquire(&dst_region, 0, dst_capacity).unwrap();
        pool.reset_data_len(dst).unwrap();

        Self {
            pool,
            src_region,
            dst_region,
            src,
            dst,
        }
    }

    pub fn dst_bytes(&self) -> Vec<u8> {
        self.pool.with_data(self.dst, |d| d.to_vec()).unwrap()
    }

    pub fn release(mut self) {
        self.pool.release(self.dst).unwrap();
        self.pool.release(self.src).unwrap();
        self.dst_region.stop().unwrap();
        self.src_region.stop().unwrap();
    }
}
