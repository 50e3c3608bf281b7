mod identity_key;
mod one_time_pre_key;

pub use identity_key::IdentityKeys;
pub(crate) use identity_key::IdentityKey;
pub use one_time_pre_key::SignedOneTimeKey;
pub(crate) use one_time_pre_key::{OneTimePreKey, OneTimePreKeyStore};

use crate::Error;
use crate::crypto::hkdf_sha256;
use crate::types::{KeyMaterial, X25519PublicKey, X25519Secret};
use x25519_dalek::SharedSecret;
use zeroize::Zeroizing;

const SALT: &[u8] = b"Parley-E2E-Salt";

/// A shared secret derived from the initial key agreement.
pub(crate) struct X3DHSharedSecret(KeyMaterial);

impl X3DHSharedSecret {
    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

/// Triple Diffie-Hellman agreement between an initiator holding a fresh base
/// key and a responder holding a one-time pre-key.
///
/// Both sides compute, in this order:
/// - DH1 = DH(IKa, OPKb)
/// - DH2 = DH(EKa, IKb)
/// - DH3 = DH(EKa, OPKb)
///
/// and feed the concatenation through HKDF with `info` as context, so peers
/// configured with different protocol info never agree on a secret.
pub(crate) struct X3DH {
    info: Vec<u8>,
}

impl X3DH {
    pub(crate) fn new(info: &[u8]) -> Self {
        Self {
            info: info.to_vec(),
        }
    }

    /// Initiator side. `base_key` is the fresh ephemeral key whose public half
    /// travels in the pre-key message.
    pub(crate) fn initiate(
        &self,
        identity: &IdentityKey,
        base_key: &X25519Secret,
        their_identity: &X25519PublicKey,
        their_one_time_key: &X25519PublicKey,
    ) -> Result<X3DHSharedSecret, Error> {
        let dh1 = identity.dh(their_one_time_key);
        let dh2 = base_key.dh(their_identity);
        let dh3 = base_key.dh(their_one_time_key);

        self.calculate_shared_secret(&dh1, &dh2, &dh3)
    }

    /// Responder side, mirroring [`Self::initiate`] with the consumed
    /// one-time key.
    pub(crate) fn respond(
        &self,
        identity: &IdentityKey,
        one_time_key: &X25519Secret,
        their_identity: &X25519PublicKey,
        their_base_key: &X25519PublicKey,
    ) -> Result<X3DHSharedSecret, Error> {
        let dh1 = one_time_key.dh(their_identity);
        let dh2 = identity.dh(their_base_key);
        let dh3 = one_time_key.dh(their_base_key);

        self.calculate_shared_secret(&dh1, &dh2, &dh3)
    }

    fn calculate_shared_secret(
        &self,
        dh1: &SharedSecret,
        dh2: &SharedSecret,
        dh3: &SharedSecret,
    ) -> Result<X3DHSharedSecret, Error> {
        let mut key_material = Zeroizing::new([0u8; 96]);
        key_material[0..32].copy_from_slice(dh1.as_bytes());
        key_material[32..64].copy_from_slice(dh2.as_bytes());
        key_material[64..96].copy_from_slice(dh3.as_bytes());

        let mut shared_secret = KeyMaterial::default();
        hkdf_sha256(
            Some(SALT),
            key_material.as_slice(),
            &self.info,
            shared_secret.as_mut_bytes(),
        )?;

        Ok(X3DHSharedSecret(shared_secret))
    }
}
