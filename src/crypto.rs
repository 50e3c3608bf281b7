//! Stateless wrappers around the primitives the protocol is built from.
//!
//! Key agreement and signatures live on the key types in [`crate::types`];
//! this module holds randomness, the SHA-256 based KDFs and the AEAD.

use crate::Error;
use crate::types::KeyMaterial;
use aes_gcm_siv::aead::{Aead, Payload};
use aes_gcm_siv::{Aes256GcmSiv, Key, KeyInit, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::TryCryptoRng;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

pub(crate) const AEAD_NONCE_SIZE: usize = 12;

type HmacSha256 = Hmac<Sha256>;

/// Draws exactly `len` bytes from `rng` in a single request.
///
/// Callers draw everything an operation needs up front so that a failing
/// source aborts the operation before any state is touched.
pub(crate) fn random_bytes<R>(rng: &mut R, len: usize) -> Result<Zeroizing<Vec<u8>>, Error>
where
    R: TryCryptoRng + ?Sized,
{
    let mut buffer = Zeroizing::new(vec![0u8; len]);
    rng.try_fill_bytes(buffer.as_mut_slice())
        .map_err(|_| Error::InsufficientRandomness)?;

    Ok(buffer)
}

/// Draws a single 32-byte seed.
pub(crate) fn random_seed<R>(rng: &mut R) -> Result<Zeroizing<[u8; 32]>, Error>
where
    R: TryCryptoRng + ?Sized,
{
    let mut seed = Zeroizing::new([0u8; 32]);
    rng.try_fill_bytes(seed.as_mut_slice())
        .map_err(|_| Error::InsufficientRandomness)?;

    Ok(seed)
}

/// HKDF-SHA-256 extract-and-expand filling all of `okm`.
pub(crate) fn hkdf_sha256(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
    okm: &mut [u8],
) -> Result<(), Error> {
    Hkdf::<Sha256>::new(salt, ikm).expand(info, okm)?;
    Ok(())
}

/// HMAC-SHA-256 of `data` under `key`, returned as fresh key material.
pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<KeyMaterial, Error> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|err| Error::Crypto(err.to_string()))?;
    mac.update(data);
    let result = mac.finalize().into_bytes();

    KeyMaterial::from_slice(&result)
        .ok_or_else(|| Error::Crypto("HMAC output too short".to_string()))
}

/// SHA-256 over the concatenation of `parts`.
pub(crate) fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }

    hasher.finalize().into()
}

/// AES-256-GCM-SIV encryption; the 16-byte tag is appended to the ciphertext.
pub(crate) fn aead_encrypt(
    key: &[u8; 32],
    nonce: &[u8; AEAD_NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, Error> {
    let cipher = Aes256GcmSiv::new(Key::<Aes256GcmSiv>::from_slice(key));

    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| Error::Crypto("Message encryption failed".to_string()))
}

/// Inverse of [`aead_encrypt`]; any authentication failure is a
/// [`Error::DecryptFailure`].
pub(crate) fn aead_decrypt(
    key: &[u8; 32],
    nonce: &[u8; AEAD_NONCE_SIZE],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, Error> {
    let cipher = Aes256GcmSiv::new(Key::<Aes256GcmSiv>::from_slice(key));

    let plaintext = cipher.decrypt(
        Nonce::from_slice(nonce),
        Payload {
            msg: ciphertext,
            aad,
        },
    )?;

    Ok(plaintext)
}
