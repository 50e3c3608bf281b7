use crate::Error;
use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use ed25519_dalek::{Signature, VerifyingKey};

/// Public Ed25519 key identifying an account's signatures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ed25519PublicKey(VerifyingKey);

impl Ed25519PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Decodes a key, rejecting encodings that are not valid curve points.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Crypto("Ed25519 keys are 32 bytes long".to_string()))?;
        let key = VerifyingKey::from_bytes(&bytes).map_err(|err| Error::Crypto(err.to_string()))?;

        Ok(Self(key))
    }

    pub fn to_base64(&self) -> String {
        STANDARD_NO_PAD.encode(self.as_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, Error> {
        let bytes = STANDARD_NO_PAD
            .decode(encoded)
            .map_err(|err| Error::Crypto(err.to_string()))?;

        Self::from_slice(&bytes)
    }

    /// Verifies `signature` over `message` with strict (non-malleable) rules.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), Error> {
        self.0
            .verify_strict(message, &signature.0)
            .map_err(|_| Error::BadSignature)
    }
}

impl From<VerifyingKey> for Ed25519PublicKey {
    fn from(value: VerifyingKey) -> Self {
        Self(value)
    }
}

/// An Ed25519 signature made by an account's identity key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ed25519Signature(Signature);

impl Ed25519Signature {
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| Error::Crypto("Ed25519 signatures are 64 bytes long".to_string()))?;

        Ok(Self(Signature::from_bytes(&bytes)))
    }

    pub fn to_base64(&self) -> String {
        STANDARD_NO_PAD.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, Error> {
        let bytes = STANDARD_NO_PAD
            .decode(encoded)
            .map_err(|err| Error::Crypto(err.to_string()))?;

        Self::from_slice(&bytes)
    }
}

impl From<Signature> for Ed25519Signature {
    fn from(value: Signature) -> Self {
        Self(value)
    }
}
