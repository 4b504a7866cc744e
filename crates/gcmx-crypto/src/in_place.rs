use crate::{CryptoError, SecureInPlaceAEAD, SUPPORTED_TAG_SIZES};

/// Seals `src` into `dst` using the offload engine frame layout.
///
/// ```text
/// dst = src[..aad_len] || AES-GCM(src[aad_len..]) || tag
/// ```
///
/// The leading `aad_len` bytes are authenticated but travel in the clear.
/// Returns the number of bytes written, always `src.len() + tag_len`.
pub fn seal_frame<A: SecureInPlaceAEAD + ?Sized>(
    aead: &A,
    nonce: &[u8],
    aad_len: usize,
    tag_len: usize,
    src: &[u8],
    dst: &mut [u8],
) -> Result<usize, CryptoError> {
    if !SUPPORTED_TAG_SIZES.contains(&tag_len) {
        return Err(CryptoError::UnsupportedTagSize(tag_len));
    }
    if aad_len > src.len() {
        return Err(CryptoError::AadExceedsInput {
            aad: aad_len,
            input: src.len(),
        });
    }
    let total = src.len() + tag_len;
    if dst.len() < total {
        return Err(CryptoError::BufferTooSmall {
            needed: total,
            available: dst.len(),
        });
    }

    let (body, rest) = dst.split_at_mut(src.len());
    body.copy_from_slice(src);
    let (aad, payload) = body.split_at_mut(aad_len);
    aead.seal_in_place_detached(nonce, aad, payload, &mut rest[..tag_len])?;
    Ok(total)
}

/// Inverse of [`seal_frame`]: verifies `frame` and writes `aad || plaintext` into `dst`.
pub fn open_frame<A: SecureInPlaceAEAD + ?Sized>(
    aead: &A,
    nonce: &[u8],
    aad_len: usize,
    tag_len: usize,
    frame: &[u8],
    dst: &mut [u8],
) -> Result<usize, CryptoError> {
    if !SUPPORTED_TAG_SIZES.contains(&tag_len) {
        return Err(CryptoError::UnsupportedTagSize(tag_len));
    }
    if frame.len() < aad_len + tag_len {
        return Err(CryptoError::BufferTooSmall {
            needed: aad_len + tag_len,
            available: frame.len(),
        });
    }
    let body_len = frame.len() - tag_len;
    if dst.len() < body_len {
        return Err(CryptoError::BufferTooSmall {
            needed: body_len,
            available: dst.len(),
        });
    }

    let (body, tag) = frame.split_at(body_len);
    let out = &mut dst[..body_len];
    out.copy_from_slice(body);
    let (aad, payload) = out.split_at_mut(aad_len);
    aead.open_in_place_detached(nonce, aad, payload, tag)?;
    Ok(body_len)
}

