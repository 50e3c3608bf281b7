//! Asynchronous end-to-end encrypted sessions between two parties.
//!
//! An [`Account`] holds a long-term identity and a pool of one-time pre-keys.
//! A peer takes the account's published [`IdentityBundle`], consumes one
//! one-time key and opens an outbound [`Session`]; its first messages are
//! pre-key messages, from which the account owner opens the matching inbound
//! session. Both sides then exchange messages through a double ratchet that
//! tolerates lost and reordered messages.
//!
//! Accounts and sessions persist only through passphrase-encrypted pickles.
//! Neither type is internally synchronized; each must be owned by one user
//! at a time.

mod account;
pub use account::{
    Account, AccountConfig, IdentityBundle, Role, Session, SessionConfig, SessionKeys,
};

mod crypto;

mod error;
pub use error::Error;

mod pickle;

mod proto;

mod ratchet;
pub use ratchet::{Message, MessageType, NormalMessage, PreKeyMessage};

mod types;
pub use types::{Ed25519PublicKey, Ed25519Signature, X25519PublicKey};

mod x3dh;
pub use x3dh::{IdentityKeys, SignedOneTimeKey};

/// Version of this crate.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
pub(crate) mod test_utils {
    use rand::{TryCryptoRng, TryRngCore};

    #[derive(Debug, thiserror::Error)]
    #[error("Random source exhausted")]
    pub(crate) struct RngExhausted;

    /// A random source that never yields anything.
    pub(crate) struct ExhaustedRng;

    impl TryRngCore for ExhaustedRng {
        type Error = RngExhausted;

        fn try_next_u32(&mut self) -> Result<u32, Self::Error> {
            Err(RngExhausted)
        }

        fn try_next_u64(&mut self) -> Result<u64, Self::Error> {
            Err(RngExhausted)
        }

        fn try_fill_bytes(&mut self, _dst: &mut [u8]) -> Result<(), Self::Error> {
            Err(RngExhausted)
        }
    }

    impl TryCryptoRng for ExhaustedRng {}

    /// A random source that serves requests until a byte budget runs out.
    /// Requests larger than the remaining budget fail as a whole.
    pub(crate) struct LimitedRng {
        remaining: usize,
    }

    impl LimitedRng {
        pub(crate) fn new(budget: usize) -> Self {
            Self { remaining: budget }
        }
    }

    impl TryRngCore for LimitedRng {
        type Error = RngExhausted;

        fn try_next_u32(&mut self) -> Result<u32, Self::Error> {
            let mut bytes = [0u8; 4];
            self.try_fill_bytes(&mut bytes)?;
            Ok(u32::from_le_bytes(bytes))
        }

        fn try_next_u64(&mut self) -> Result<u64, Self::Error> {
            let mut bytes = [0u8; 8];
            self.try_fill_bytes(&mut bytes)?;
            Ok(u64::from_le_bytes(bytes))
        }

        fn try_fill_bytes(&mut self, dst: &mut [u8]) -> Result<(), Self::Error> {
            if dst.len() > self.remaining {
                return Err(RngExhausted);
            }
            self.remaining -= dst.len();
            rand::rng().try_fill_bytes(dst).map_err(|_| RngExhausted)
        }
    }

    impl TryCryptoRng for LimitedRng {}
}
