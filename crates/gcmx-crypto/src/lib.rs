//! # gcmx-crypto: AES-GCM Key Schedules
//!
//! ## Performance Contract
//! - **Key Expansion**: once per key, at `GcmCipher::new`. Tasks never re-expand.
//! - **Transform**: in place over engine-owned windows. ZERO heap allocations.

pub mod in_place;

pub use in_place::{open_frame, seal_frame};

use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::{AeadInPlace, KeyInit, Nonce, Tag};
use aes_gcm::aes::{Aes128, Aes256};
use aes_gcm::AesGcm;
use zeroize::Zeroizing;

/// AES-GCM nonce length accepted by every schedule.
pub const NONCE_LEN: usize = 12;

/// Authentication tag sizes (96 and 128 bit).
pub const SUPPORTED_TAG_SIZES: [usize; 2] = [12, 16];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Aes128,
    Aes256,
}

impl KeyType {
    /// Infers the key type from a raw key length.
    pub fn from_len(len: usize) -> Result<Self, CryptoError> {
        match len {
            16 => Ok(KeyType::Aes128),
            32 => Ok(KeyType::Aes256),
            other => Err(CryptoError::UnsupportedKeyLength(other)),
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            KeyType::Aes128 => 16,
            KeyType::Aes256 => 32,
        }
    }

    pub fn bits(self) -> usize {
        self.key_len() * 8
    }
}

/// A raw symmetric key plus its declared type. Wiped on drop.
#[derive(Clone)]
pub struct KeyMaterial {
    key_type: KeyType,
    raw: Zeroizing<Vec<u8>>,
}

impl KeyMaterial {
    pub fn new(raw: &[u8], key_type: KeyType) -> Result<Self, CryptoError> {
        if raw.len() != key_type.key_len() {
            return Err(CryptoError::KeyTypeMismatch {
                declared: key_type.bits(),
                actual: raw.len() * 8,
            });
        }
        Ok(Self {
            key_type,
            raw: Zeroizing::new(raw.to_vec()),
        })
    }

    /// Builds key material whose type follows from the key length.
    pub fn from_raw(raw: &[u8]) -> Result<Self, CryptoError> {
        Self::new(raw, KeyType::from_len(raw.len())?)
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    fn expose(&self) -> &[u8] {
        &self.raw
    }
}

impl core::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_type", &self.key_type)
            .field("raw", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("unsupported AES key length: {0} bytes")]
    UnsupportedKeyLength(usize),

    #[error("key declared as AES-{declared} but carries {actual} bits")]
    KeyTypeMismatch { declared: usize, actual: usize },

    #[error("nonce must be {NONCE_LEN} bytes, got {0}")]
    InvalidNonceLength(usize),

    #[error("unsupported tag size: {0} bytes")]
    UnsupportedTagSize(usize),

    #[error("AAD of {aad} bytes exceeds the {input}-byte input")]
    AadExceedsInput { aad: usize, input: usize },

    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("AEAD seal failed")]
    SealFailed,

    #[error("AEAD integrity check failed")]
    IntegrityCheckFailed,
}

impl CryptoError {
    /// Errno-style status code reported in task completions.
    pub fn status_code(&self) -> i32 {
        match self {
            CryptoError::BufferTooSmall { .. } => -105, // ENOBUFS
            CryptoError::IntegrityCheckFailed => -74,   // EBADMSG
            CryptoError::SealFailed => -5,              // EIO
            _ => -22,                                   // EINVAL
        }
    }
}

type Gcm128<T> = AesGcm<Aes128, U12, T>;
type Gcm256<T> = AesGcm<Aes256, U12, T>;

enum Schedule {
    Aes128 { tag96: Gcm128<U12>, tag128: Gcm128<U16> },
    Aes256 { tag96: Gcm256<U12>, tag128: Gcm256<U16> },
}

/// Expanded AES-GCM key, usable with either supported tag size.
pub struct GcmCipher {
    key_type: KeyType,
    schedule: Schedule,
}

impl GcmCipher {
    pub fn new(key: &KeyMaterial) -> Result<Self, CryptoError> {
        let raw = key.expose();
        let bad_len = |_| CryptoError::UnsupportedKeyLength(raw.len());
        let schedule = match key.key_type() {
            KeyType::Aes128 => Schedule::Aes128 {
                tag96: Gcm128::<U12>::new_from_slice(raw).map_err(bad_len)?,
                tag128: Gcm128::<U16>::new_from_slice(raw).map_err(bad_len)?,
            },
            KeyType::Aes256 => Schedule::Aes256 {
                tag96: Gcm256::<U12>::new_from_slice(raw).map_err(bad_len)?,
                tag128: Gcm256::<U16>::new_from_slice(raw).map_err(bad_len)?,
            },
        };
        Ok(Self {
            key_type: key.key_type(),
            schedule,
        })
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }
}

/// In-place Authenticated Encryption over engine-registered windows.
///
/// The tag size is selected by the length of the tag slice.
pub trait SecureInPlaceAEAD {
    /// Encrypts `buffer` in place and writes the tag into `tag`.
    fn seal_in_place_detached(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buffer: &mut [u8],
        tag: &mut [u8],
    ) -> Result<(), CryptoError>;

    /// Decrypts `buffer` in place after verifying `tag`.
    fn open_in_place_detached(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buffer: &mut [u8],
        tag: &[u8],
    ) -> Result<(), CryptoError>;
}

impl SecureInPlaceAEAD for GcmCipher {
    #[inline(always)]
    fn seal_in_place_detached(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buffer: &mut [u8],
        tag: &mut [u8],
    ) -> Result<(), CryptoError> {
        check_nonce(nonce)?;
        match (&self.schedule, tag.len()) {
            (Schedule::Aes128 { tag96, .. }, 12) => seal_with(tag96, nonce, aad, buffer, tag),
            (Schedule::Aes128 { tag128, .. }, 16) => seal_with(tag128, nonce, aad, buffer, tag),
            (Schedule::Aes256 { tag96, .. }, 12) => seal_with(tag96, nonce, aad, buffer, tag),
            (Schedule::Aes256 { tag128, .. }, 16) => seal_with(tag128, nonce, aad, buffer, tag),
            (_, other) => Err(CryptoError::UnsupportedTagSize(other)),
        }
    }

    #[inline(always)]
    fn open_in_place_detached(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buffer: &mut [u8],
        tag: &[u8],
    ) -> Result<(), CryptoError> {
        check_nonce(nonce)?;
        match (&self.schedule, tag.len()) {
            (Schedule::Aes128 { tag96, .. }, 12) => open_with(tag96, nonce, aad, buffer, tag),
            (Schedule::Aes128 { tag128, .. }, 16) => open_with(tag128, nonce, aad, buffer, tag),
            (Schedule::Aes256 { tag96, .. }, 12) => open_with(tag96, nonce, aad, buffer, tag),
            (Schedule::Aes256 { tag128, .. }, 16) => open_with(tag128, nonce, aad, buffer, tag),
            (_, other) => Err(CryptoError::UnsupportedTagSize(other)),
        }
    }
}

fn check_nonce(nonce: &[u8]) -> Result<(), CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::InvalidNonceLength(nonce.len()));
    }
    Ok(())
}

#[inline(always)]
fn seal_with<C: AeadInPlace>(
    cipher: &C,
    nonce: &[u8],
    aad: &[u8],
    buffer: &mut [u8],
    tag_out: &mut [u8],
) -> Result<(), CryptoError> {
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<C>::from_slice(nonce), aad, buffer)
        .map_err(|_| CryptoError::SealFailed)?;
    tag_out.copy_from_slice(&tag);
    Ok(())
}

#[inline(always)]
fn open_with<C: AeadInPlace>(
    cipher: &C,
    nonce: &[u8],
    aad: &[u8],
    buffer: &mut [u8],
    tag: &[u8],
) -> Result<(), CryptoError> {
    cipher
        .decrypt_in_place_detached(Nonce::<C>::from_slice(nonce), aad, buffer, Tag::<C>::from_slice(tag))
        .map_err(|_| CryptoError::IntegrityCheckFailed)
}
