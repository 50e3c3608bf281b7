use crate::Error;
use crate::crypto::hmac_sha256;
use crate::types::KeyMaterial;
use zeroize::{Zeroize, ZeroizeOnDrop};

const CHAIN_KEY_SEED: &[u8] = &[0x01];
const MESSAGE_KEY_SEED: &[u8] = &[0x02];

/// Symmetric KDF chain: every step yields one message key and replaces the
/// chain key, so earlier message keys cannot be recomputed from the current
/// state.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct Chain {
    pub(crate) chain_key: KeyMaterial,
    pub(crate) index: u32,
}

impl Chain {
    pub(crate) fn new(chain_key: KeyMaterial) -> Self {
        Self {
            chain_key,
            index: 0,
        }
    }

    pub(crate) fn with_index(chain_key: KeyMaterial, index: u32) -> Self {
        Self { chain_key, index }
    }

    /// Advances the chain and returns the message key for the old index.
    pub(crate) fn next(&mut self) -> Result<KeyMaterial, Error> {
        let next_index = self
            .index
            .checked_add(1)
            .ok_or_else(|| Error::Crypto("Chain index exhausted".to_string()))?;

        let message_key = hmac_sha256(self.chain_key.as_bytes(), MESSAGE_KEY_SEED)?;
        self.chain_key = hmac_sha256(self.chain_key.as_bytes(), CHAIN_KEY_SEED)?;
        self.index = next_index;

        Ok(message_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Chain {
        Chain::new(KeyMaterial::from_slice(&[7u8; 32]).unwrap())
    }

    #[test]
    fn test_chain_advances_and_yields_distinct_keys() {
        let mut chain = chain();
        let first = chain.next().unwrap();
        let second = chain.next().unwrap();

        assert_eq!(chain.index, 2);
        assert!(first != second);
    }

    #[test]
    fn test_chain_is_deterministic() {
        let mut a = chain();
        let mut b = chain();

        for _ in 0..5 {
            assert!(a.next().unwrap() == b.next().unwrap());
        }
        assert!(a.chain_key == b.chain_key);
    }

    #[test]
    fn test_old_chain_key_is_replaced() {
        let mut chain = chain();
        let before = chain.chain_key.clone();
        let message_key = chain.next().unwrap();

        assert!(chain.chain_key != before);
        assert!(chain.chain_key != message_key);
    }

    #[test]
    fn test_index_overflow_is_an_error() {
        let mut chain = Chain::with_index(KeyMaterial::default(), u32::MAX);
        assert!(matches!(chain.next(), Err(Error::Crypto(_))));
        assert_eq!(chain.index, u32::MAX);
    }
}
