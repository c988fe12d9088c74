//! Low-level cryptographic operations.
//!
//! This module is one of exactly two places in the crate that import `ring`
//! directly (the other is `keys`). Everything else seals and opens through
//! [`crate::envelope`], which calls the functions exposed here.
//!
//! Primitive choices:
//! - **Cipher**: AES-256-GCM (authenticated encryption, empty AAD)
//! - **Nonce**: 96-bit (12 bytes), generated fresh per record via `SystemRandom`
//! - **Key size**: 256 bits (32 bytes)
//!
//! # Layout of sealed bytes
//! ```text
//! [ ciphertext + GCM tag ][ nonce (12 bytes) ]
//! ```
//! The nonce trails the ciphertext because the per-record key is derived
//! from it; a reader must recover the nonce before it can build the key.

use ring::aead::{self, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::BgCacheError;

/// The AEAD algorithm used throughout bgcache.
const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of a master or derived key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Generate a cryptographically secure random nonce.
///
/// A fresh nonce is generated for every record. There is no nonce caching
/// or counter-based generation.
pub fn generate_nonce() -> Result<[u8; NONCE_LEN], BgCacheError> {
    let rng = SystemRandom::new();
    let mut buf = [0u8; NONCE_LEN];
    rng.fill(&mut buf).map_err(|_| BgCacheError::RandomnessFailure)?;
    Ok(buf)
}

/// Split sealed bytes into `(ciphertext + tag, nonce)`.
pub fn split_nonce(sealed: &[u8]) -> Result<(&[u8], [u8; NONCE_LEN]), BgCacheError> {
    if sealed.len() < NONCE_LEN {
        return Err(BgCacheError::MalformedCiphertext);
    }
    let (body, tail) = sealed.split_at(sealed.len() - NONCE_LEN);
    let nonce: [u8; NONCE_LEN] = tail
        .try_into()
        .map_err(|_| BgCacheError::MalformedCiphertext)?;
    Ok((body, nonce))
}

/// Seal `plaintext` under `key_bytes` and `nonce`, appending the nonce.
pub fn seal(
    key_bytes: &[u8; KEY_LEN],
    nonce: [u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, BgCacheError> {
    let unbound =
        UnboundKey::new(ALGORITHM, key_bytes).map_err(|_| BgCacheError::EncryptionFailure)?;
    let key = LessSafeKey::new(unbound);

    let mut output = Vec::with_capacity(plaintext.len() + ALGORITHM.tag_len() + NONCE_LEN);
    output.extend_from_slice(plaintext);

    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(nonce),
        aead::Aad::empty(),
        &mut output,
    )
    .map_err(|_| BgCacheError::EncryptionFailure)?;

    output.extend_from_slice(&nonce);
    Ok(output)
}

/// Open a ciphertext body (without its trailing nonce).
///
/// The caller's buffer is never touched; decryption works on a copy. On a
/// wrong key or tampered data the GCM check fails and no partial plaintext
/// is returned.
pub fn open(
    key_bytes: &[u8; KEY_LEN],
    nonce: [u8; NONCE_LEN],
    body: &[u8],
) -> Result<Vec<u8>, BgCacheError> {
    let unbound = UnboundKey::new(ALGORITHM, key_bytes).map_err(|_| BgCacheError::AuthFailed)?;
    let key = LessSafeKey::new(unbound);

    let mut payload = body.to_vec();
    let plaintext = key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce),
            aead::Aad::empty(),
            &mut payload,
        )
        .map_err(|_| BgCacheError::AuthFailed)?;

    Ok(plaintext.to_vec())
}

/// Generate a cryptographically secure random key.
///
/// This is the only function in the crate that produces raw key material
/// from scratch. It backs `generate_master_key_hex()` in the public API.
pub fn generate_random_key() -> Result<[u8; KEY_LEN], BgCacheError> {
    let rng = SystemRandom::new();
    let mut key = [0u8; KEY_LEN];
    rng.fill(&mut key).map_err(|_| BgCacheError::RandomnessFailure)?;
    Ok(key)
}
