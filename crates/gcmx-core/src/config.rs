use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use gcmx_crypto::{KeyMaterial, NONCE_LEN, SUPPORTED_TAG_SIZES};
use serde::Deserialize;

use crate::error::{GcmXError, Result};
use crate::payload::parse_size;

/// Where encryption tasks execute.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Tasks run on the polling thread during `poll`.
    Inline,
    /// Tasks run on a dedicated worker thread fed through SPSC rings.
    #[default]
    Offload,
}

impl FromStr for ExecutionMode {
    type Err = GcmXError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "inline" => Ok(ExecutionMode::Inline),
            "offload" => Ok(ExecutionMode::Offload),
            other => Err(GcmXError::Config(format!(
                "unknown execution mode '{other}' (expected inline or offload)"
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub mode: ExecutionMode,
    pub max_buffer_size: usize,
    pub max_aad_size: usize,
    /// Submission/completion ring depth. Must be a power of two.
    pub queue_depth: usize,
    pub worker_core: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Offload,
            max_buffer_size: 2 * 1024 * 1024,
            max_aad_size: 1024,
            queue_depth: 64,
            worker_core: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BenchConfig {
    /// PCI address of the device, `BB:DD.F`.
    pub device: String,
    pub key_hex: String,
    pub iv_hex: String,
    pub tag_size: usize,
    pub aad_size: usize,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Synthetic payload size, e.g. `"10MB"`.
    pub payload_size: String,
    pub duration_ms: u64,
    pub poll_interval_us: u64,
    /// Empty polls spent spinning before the pump starts sleeping.
    pub spin_polls: u32,
    pub engine: EngineConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            device: "03:00.0".to_string(),
            key_hex: "00".repeat(32),
            iv_hex: "00".repeat(NONCE_LEN),
            tag_size: 16,
            aad_size: 0,
            input_path: PathBuf::from("/tmp/gcmx_input.bin"),
            output_path: PathBuf::from("/tmp/gcmx_output.bin"),
            payload_size: "1MB".to_string(),
            duration_ms: 5000,
            poll_interval_us: 10,
            spin_polls: 0,
            engine: EngineConfig::default(),
        }
    }
}

impl BenchConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| GcmXError::file_io(path, e))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| GcmXError::Config(e.to_string()))
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !is_pci_address(&self.device) {
            return Err(GcmXError::Config(format!(
                "device '{}' is not a PCI address (BB:DD.F)",
                self.device
            )));
        }
        self.key_material()?;
        self.iv()?;
        if !SUPPORTED_TAG_SIZES.contains(&self.tag_size) {
            return Err(GcmXError::Config(format!(
                "tag size {} is not one of {:?}",
                self.tag_size, SUPPORTED_TAG_SIZES
            )));
        }
        if self.aad_size > self.engine.max_aad_size {
            return Err(GcmXError::Config(format!(
                "aad size {} exceeds the engine maximum of {}",
                self.aad_size, self.engine.max_aad_size
            )));
        }
        if self.payload_bytes()? == 0 {
            return Err(GcmXError::Config("payload size must be non-zero".to_string()));
        }
        if self.duration_ms == 0 {
            return Err(GcmXError::Config("duration_ms must be positive".to_string()));
        }
        if !self.engine.queue_depth.is_power_of_two() {
            return Err(GcmXError::Config(format!(
                "queue depth {} is not a power of two",
                self.engine.queue_depth
            )));
        }
        if self.engine.max_buffer_size == 0 {
            return Err(GcmXError::Config("max_buffer_size must be positive".to_string()));
        }
        Ok(())
    }

    pub fn raw_key(&self) -> Result<Vec<u8>> {
        hex::decode(self.key_hex.trim()).map_err(|e| GcmXError::Config(format!("key: {e}")))
    }

    pub fn key_material(&self) -> Result<KeyMaterial> {
        KeyMaterial::from_raw(&self.raw_key()?).map_err(|e| GcmXError::Config(format!("key: {e}")))
    }

    pub fn iv(&self) -> Result<Vec<u8>> {
        let iv = hex::decode(self.iv_hex.trim()).map_err(|e| GcmXError::Config(format!("iv: {e}")))?;
        if iv.len() != NONCE_LEN {
            return Err(GcmXError::Config(format!(
                "iv must be {NONCE_LEN} bytes, got {}",
                iv.len()
            )));
        }
        Ok(iv)
    }

    pub fn payload_bytes(&self) -> Result<usize> {
        parse_size(&self.payload_size)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }
}

/// `BB:DD.F` with an optional `DDDD:` domain prefix.
fn is_pci_address(s: &str) -> bool {
    let bdf = match s.split(':').count() {
        2 => s,
        3 => match s.split_once(':') {
            Some((domain, rest)) if is_hex(domain, 4) => rest,
            _ => return false,
        },
        _ => return false,
    };
    let Some((bus, devfn)) = bdf.split_once(':') else {
        return false;
    };
    let Some((dev, func)) = devfn.split_once('.') else {
        return false;
    };
    is_hex(bus, 2) && is_hex(dev, 2) && func.len() == 1 && matches!(func.as_bytes()[0], b'0'..=b'7')
}

fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}
