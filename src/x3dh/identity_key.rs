use crate::types::{Ed25519PublicKey, Ed25519Signature, X25519PublicKey, X25519Secret};
use crate::Error;
use ed25519_dalek::{Signer, SigningKey};
use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// The public identity of an account.
///
/// The Ed25519 key authenticates signatures made with [`crate::Account::sign`]
/// and the signatures over published one-time keys; the Curve25519 key takes
/// part in the session key agreement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdentityKeys {
    /// Signing identity.
    pub ed25519: Ed25519PublicKey,
    /// Key-agreement identity.
    pub curve25519: X25519PublicKey,
}

impl IdentityKeys {
    /// Verifies a signature made by the account these keys belong to.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), Error> {
        self.ed25519.verify(message, signature)
    }
}

/// Long-term identity key pair: an Ed25519 signing key and an X25519
/// agreement key drawn from independent seeds. Never rotated.
#[derive(Clone)]
pub(crate) struct IdentityKey {
    signing_key: Box<SigningKey>,
    dh_key: X25519Secret,
}

impl IdentityKey {
    /// Builds an identity from 64 bytes of seed material: the Ed25519 seed
    /// followed by the X25519 secret.
    pub(crate) fn from_seed(seed: &[u8; 64]) -> Self {
        let mut signing_seed = Zeroizing::new([0u8; 32]);
        signing_seed.copy_from_slice(&seed[..32]);
        let mut dh_seed = Zeroizing::new([0u8; 32]);
        dh_seed.copy_from_slice(&seed[32..]);

        Self {
            signing_key: Box::new(SigningKey::from_bytes(&signing_seed)),
            dh_key: X25519Secret::from(&*dh_seed),
        }
    }

    pub(crate) fn sign(&self, message: &[u8]) -> Ed25519Signature {
        self.signing_key.sign(message).into()
    }

    pub(crate) fn public_keys(&self) -> IdentityKeys {
        IdentityKeys {
            ed25519: self.signing_key.verifying_key().into(),
            curve25519: self.dh_key.public_key(),
        }
    }

    pub(crate) fn dh_key_public(&self) -> X25519PublicKey {
        self.dh_key.public_key()
    }

    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> SharedSecret {
        self.dh_key.dh(public_key)
    }

    /// The 64-byte seed this identity can be rebuilt from.
    pub(crate) fn to_seed(&self) -> Zeroizing<[u8; 64]> {
        let mut bytes = Zeroizing::new([0u8; 64]);
        bytes[..32].copy_from_slice(self.signing_key.as_bytes());
        bytes[32..].copy_from_slice(self.dh_key.as_bytes());

        bytes
    }
}

impl Zeroize for IdentityKey {
    fn zeroize(&mut self) {
        // SigningKey wipes itself on drop; the agreement key is wiped here
        self.dh_key.zeroize();
    }
}

impl ZeroizeOnDrop for IdentityKey {}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(byte: u8) -> IdentityKey {
        let mut seed = [byte; 64];
        seed[32] ^= 0x5a;
        IdentityKey::from_seed(&seed)
    }

    #[test]
    fn test_signing_and_verification() {
        let identity_key = identity(1);
        let message = b"This is a test message";

        let signature = identity_key.sign(message);
        assert!(identity_key.public_keys().verify(message, &signature).is_ok());

        let modified_message = b"This is a modified message";
        assert_eq!(
            identity_key
                .public_keys()
                .verify(modified_message, &signature)
                .unwrap_err(),
            Error::BadSignature
        );
    }

    #[test]
    fn test_seed_round_trip() {
        let original_key = identity(3);
        let restored = IdentityKey::from_seed(&original_key.to_seed());

        assert_eq!(original_key.public_keys(), restored.public_keys());
    }

    #[test]
    fn test_independent_key_halves() {
        let key = identity(4);
        let keys = key.public_keys();

        assert_ne!(keys.ed25519.as_bytes(), keys.curve25519.as_bytes());
    }
}
