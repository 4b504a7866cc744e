use gcmx_core::{GcmXError, Result};
use gcmx_crypto::KeyMaterial;

use crate::engine::{Completion, EncryptTask, EncryptionEngine, EngineCapabilities, KeyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Allocated,
    Started,
    Stopped,
    Destroyed,
}

/// Binding of one device to an execution engine.
///
/// ## Lifecycle
/// `Allocated → Started → Stopped → Destroyed`. `stop` only requests a drain:
/// in-flight tasks keep completing through `poll` until [`is_idle`](Self::is_idle)
/// holds, and `destroy` refuses to run before that.
pub struct ExecutionContext<E: EncryptionEngine> {
    device: String,
    engine: E,
    state: ContextState,
}

impl<E: EncryptionEngine> ExecutionContext<E> {
    pub fn new(device: impl Into<String>, engine: E) -> Self {
        Self {
            device: device.into(),
            engine,
            state: ContextState::Allocated,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state != ContextState::Allocated {
            return Err(self.lifecycle_error("start", "Allocated"));
        }
        self.engine.start().map_err(|e| {
            GcmXError::ContextLifecycle(format!("device {} unavailable: {e}", self.device))
        })?;
        self.state = ContextState::Started;
        tracing::info!("context on {} started ({})", self.device, self.engine.name());
        Ok(())
    }

    /// Requests a drain. Not synchronous: pump until [`is_idle`](Self::is_idle).
    pub fn stop(&mut self) -> Result<()> {
        if self.state != ContextState::Started {
            return Err(self.lifecycle_error("stop", "Started"));
        }
        self.engine.stop()?;
        self.state = ContextState::Stopped;
        tracing::debug!(
            "context on {} stopping with {} task(s) in flight",
            self.device,
            self.engine.in_flight()
        );
        Ok(())
    }

    /// Not started (or stopped) and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.state != ContextState::Started && self.engine.in_flight() == 0
    }

    pub fn capabilities(&self) -> EngineCapabilities {
        self.engine.capabilities()
    }

    pub fn query_max_buffer_size(&self) -> usize {
        self.engine.capabilities().max_buffer_size
    }

    /// Fails with `BufferTooLarge` when `len` exceeds what one task may carry.
    pub fn ensure_fits(&self, len: usize) -> Result<()> {
        let max = self.query_max_buffer_size();
        if len > max {
            return Err(GcmXError::BufferTooLarge { len, max });
        }
        Ok(())
    }

    pub fn create_key(&mut self, key: &KeyMaterial) -> Result<KeyId> {
        if self.state == ContextState::Destroyed {
            return Err(self.lifecycle_error("create a key on", "any live state"));
        }
        self.engine.create_key(key)
    }

    pub fn destroy_key(&mut self, key: KeyId) -> Result<()> {
        if self.state == ContextState::Destroyed {
            return Err(self.lifecycle_error("destroy a key on", "any live state"));
        }
        self.engine.destroy_key(key)
    }

    pub fn submit(&mut self, task: EncryptTask) -> Result<()> {
        if self.state != ContextState::Started {
            return Err(self.lifecycle_error("submit to", "Started"));
        }
        self.engine.submit_encrypt(task)
    }

    pub fn poll(&mut self) -> Option<Completion> {
        if self.state == ContextState::Destroyed {
            return None;
        }
        self.engine.poll()
    }

    pub fn in_flight(&self) -> usize {
        self.engine.in_flight()
    }

    pub fn destroy(&mut self) -> Result<()> {
        match self.state {
            ContextState::Started => Err(self.lifecycle_error("destroy", "Allocated or Stopped")),
            ContextState::Destroyed => Err(GcmXError::ContextLifecycle(format!(
                "context on {} is already destroyed",
                self.device
            ))),
            _ if self.engine.in_flight() > 0 => Err(GcmXError::ContextLifecycle(format!(
                "context on {} still has {} task(s) in flight; drain before destroying",
                self.device,
                self.engine.in_flight()
            ))),
            _ => {
                self.state = ContextState::Destroyed;
                tracing::debug!("context on {} destroyed", self.device);
                Ok(())
            }
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    fn lifecycle_error(&self, action: &str, expected: &str) -> GcmXError {
        GcmXError::ContextLifecycle(format!(
            "cannot {action} context on {} in state {:?} (expected {expected})",
            self.device, self.state
        ))
    }
}
