use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use gcmx_crypto::CryptoError;
use gcmx_dsa::MemError;

pub type Result<T> = std::result::Result<T, GcmXError>;

/// Coarse failure classes, as surfaced in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ResourceAllocation,
    ContextLifecycle,
    BufferTooLarge,
    EncryptionTaskFailed,
    FileIo,
    Teardown,
    InvalidArgument,
    Config,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum GcmXError {
    #[error("resource allocation failed: {0}")]
    ResourceAllocation(String),

    #[error(transparent)]
    Memory(#[from] MemError),

    #[error("execution context: {0}")]
    ContextLifecycle(String),

    #[error("payload of {len} bytes exceeds the engine maximum of {max} bytes")]
    BufferTooLarge { len: usize, max: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("encryption task {task_id} failed (status {status}): {description}")]
    EncryptionTaskFailed {
        task_id: u64,
        status: i32,
        description: String,
    },

    #[error("I/O on {}: {source}", path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("configuration: {0}")]
    Config(String),

    #[error("cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("{}", describe_teardown(.primary, .failures))]
    Teardown {
        primary: Option<Box<GcmXError>>,
        failures: Vec<GcmXError>,
    },
}

impl GcmXError {
    pub fn file_io(path: impl AsRef<Path>, source: io::Error) -> Self {
        GcmXError::FileIo {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            GcmXError::ResourceAllocation(_) | GcmXError::Memory(_) => {
                ErrorCategory::ResourceAllocation
            }
            GcmXError::ContextLifecycle(_) => ErrorCategory::ContextLifecycle,
            GcmXError::BufferTooLarge { .. } => ErrorCategory::BufferTooLarge,
            GcmXError::InvalidArgument(_) | GcmXError::Crypto(_) => ErrorCategory::InvalidArgument,
            GcmXError::EncryptionTaskFailed { .. } => ErrorCategory::EncryptionTaskFailed,
            GcmXError::FileIo { .. } => ErrorCategory::FileIo,
            GcmXError::Config(_) => ErrorCategory::Config,
            GcmXError::Cancelled { .. } => ErrorCategory::Cancelled,
            GcmXError::Teardown { .. } => ErrorCategory::Teardown,
        }
    }

    /// The failure that aborted the run, looking through teardown chaining.
    pub fn root_cause(&self) -> &GcmXError {
        match self {
            GcmXError::Teardown {
                primary: Some(primary),
                ..
            } => primary.root_cause(),
            other => other,
        }
    }
}

/// Fails with `Cancelled` once `flag` has been raised.
pub fn check_cancelled(flag: &AtomicBool, stage: &'static str) -> Result<()> {
    if flag.load(Ordering::Relaxed) {
        tracing::warn!("cancellation requested during {}", stage);
        return Err(GcmXError::Cancelled { stage });
    }
    Ok(())
}

fn describe_teardown(primary: &Option<Box<GcmXError>>, failures: &[GcmXError]) -> String {
    let mut out = match primary {
        Some(primary) => format!("{primary}; additionally teardown failed"),
        None => "teardown failed".to_string(),
    };
    for (i, failure) in failures.iter().enumerate() {
        out.push_str(if i == 0 { ": " } else { "; " });
        out.push_str(&failure.to_string());
    }
    out
}

/// Best-effort cleanup ledger.
///
/// Every step is attempted; failures are logged as they happen and folded
/// into the final result without masking the error that triggered teardown.
#[derive(Debug, Default)]
pub struct TeardownLog {
    failures: Vec<GcmXError>,
}

impl TeardownLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: &'static str, result: Result<()>) {
        if let Err(e) = result {
            tracing::error!("teardown: {} failed: {}", stage, e);
            self.failures.push(e);
        }
    }

    pub fn failures(&self) -> &[GcmXError] {
        &self.failures
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        match (outcome, self.failures.is_empty()) {
            (outcome, true) => outcome,
            (Ok(_), false) => Err(GcmXError::Teardown {
                primary: None,
                failures: self.failures,
            }),
            (Err(primary), false) => Err(GcmXError::Teardown {
                primary: Some(Box::new(primary)),
                failures: self.failures,
            }),
        }
    }
}
