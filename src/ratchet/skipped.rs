use crate::types::{KeyMaterial, X25519PublicKey};
use std::collections::VecDeque;

/// A message key derived while skipping over a gap in a receiving chain.
#[derive(Clone)]
pub(crate) struct SkippedMessageKey {
    pub(crate) ratchet_key: X25519PublicKey,
    pub(crate) index: u32,
    pub(crate) message_key: KeyMaterial,
}

/// Bounded cache of skipped message keys in creation order.
///
/// Once full, inserting drops the oldest entry. A key leaves the cache the
/// moment it is taken for a decryption.
#[derive(Clone)]
pub(crate) struct SkippedMessageKeys {
    keys: VecDeque<SkippedMessageKey>,
    max_keys: usize,
}

impl SkippedMessageKeys {
    pub(crate) fn new(max_keys: usize) -> Self {
        Self {
            keys: VecDeque::new(),
            max_keys,
        }
    }

    pub(crate) fn insert(&mut self, key: SkippedMessageKey) {
        if self.max_keys == 0 {
            return;
        }
        while self.keys.len() >= self.max_keys {
            self.keys.pop_front();
        }
        self.keys.push_back(key);
    }

    /// Removes and returns the key for `index` on the chain of `ratchet_key`.
    pub(crate) fn take(&mut self, ratchet_key: &X25519PublicKey, index: u32) -> Option<KeyMaterial> {
        let position = self
            .keys
            .iter()
            .position(|key| key.ratchet_key == *ratchet_key && key.index == index)?;

        self.keys.remove(position).map(|key| key.message_key)
    }

    pub(crate) fn max_keys(&self) -> usize {
        self.max_keys
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &SkippedMessageKey> {
        self.keys.iter()
    }
}
