use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;
use tempfile::NamedTempFile;

use crate::error::{GcmXError, Result};

const GENERATE_CHUNK: usize = 64 * 1024;

/// Parses `<n>B`, `<n>K`/`<n>KB`, `<n>M`/`<n>MB` or `<n>G`/`<n>GB` (binary multiples).
pub fn parse_size(spec: &str) -> Result<usize> {
    let spec = spec.trim();
    let split = spec
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(spec.len());
    let (digits, unit) = spec.split_at(split);
    let invalid = || {
        GcmXError::Config(format!(
            "invalid size '{spec}': use <number>B, <number>K, <number>M, or <number>G"
        ))
    };

    let value: usize = digits.parse().map_err(|_| invalid())?;
    let multiplier: usize = match unit {
        "B" => 1,
        "K" | "KB" => 1 << 10,
        "M" | "MB" => 1 << 20,
        "G" | "GB" => 1 << 30,
        _ => return Err(invalid()),
    };
    value
        .checked_mul(multiplier)
        .ok_or_else(|| GcmXError::Config(format!("size '{spec}' overflows usize")))
}

/// Writes `size` bytes from the OS CSPRNG to `path`, replacing any existing file.
pub fn generate_random_payload(path: impl AsRef<Path>, size: usize) -> Result<()> {
    let path = path.as_ref();
    let io_err = |e| GcmXError::file_io(path, e);

    let mut out = BufWriter::new(File::create(path).map_err(io_err)?);
    let mut chunk = vec![0u8; GENERATE_CHUNK.min(size.max(1))];
    let mut remaining = size;
    while remaining > 0 {
        let n = remaining.min(chunk.len());
        OsRng
            .try_fill_bytes(&mut chunk[..n])
            .map_err(|e| GcmXError::ResourceAllocation(format!("OS entropy source: {e}")))?;
        out.write_all(&chunk[..n]).map_err(io_err)?;
        remaining -= n;
    }
    out.flush().map_err(io_err)?;
    tracing::info!("generated {} bytes of random data to {}", size, path.display());
    Ok(())
}

pub fn read_payload(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|e| GcmXError::file_io(path, e))
}

/// Output file that only appears at its final path once committed.
///
/// The backing temp file is created next to the target at construction, and an
/// existing target is opened for writing (never truncated), so an unwritable
/// destination is reported before any other work starts. Dropping an
/// uncommitted sink removes the temp file.
pub struct OutputSink {
    target: PathBuf,
    file: NamedTempFile,
}

impl OutputSink {
    pub fn create(target: impl AsRef<Path>) -> Result<Self> {
        let target = target.as_ref().to_path_buf();
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        // An existing target must accept writes: a directory or read-only file
        // would otherwise only fail at commit, after the whole run.
        if let Ok(meta) = std::fs::symlink_metadata(&target) {
            if !meta.file_type().is_symlink() {
                OpenOptions::new()
                    .write(true)
                    .open(&target)
                    .map_err(|e| GcmXError::file_io(&target, e))?;
            }
        }
        let file = NamedTempFile::new_in(&dir).map_err(|e| GcmXError::file_io(&target, e))?;
        Ok(Self { target, file })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.file
            .write_all(bytes)
            .map_err(|e| GcmXError::file_io(&self.target, e))
    }

    /// Atomically replaces the target with everything written so far.
    pub fn commit(self) -> Result<PathBuf> {
        let Self { target, mut file } = self;
        file.flush().map_err(|e| GcmXError::file_io(&target, e))?;
        file.persist(&target)
            .map_err(|e| GcmXError::file_io(&target, e.error))?;
        Ok(target)
    }
}
