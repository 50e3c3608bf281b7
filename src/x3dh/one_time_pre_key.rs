use crate::types::{Ed25519Signature, X25519PublicKey, X25519Secret};
use crate::x3dh::{IdentityKey, IdentityKeys};
use crate::Error;
use std::collections::BTreeMap;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Domain separation prefix for one-time key signatures.
const ONE_TIME_KEY_SIGNATURE_PREFIX: &[u8] = b"Parley-OTK";

/// A published one-time key: its id, the public key and the owner's Ed25519
/// signature binding the two.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignedOneTimeKey {
    /// Id the responder uses to find the matching secret.
    pub id: u32,
    /// Public Curve25519 key.
    pub key: X25519PublicKey,
    /// Signature of the owner's identity key over `id` and `key`.
    pub signature: Ed25519Signature,
}

impl SignedOneTimeKey {
    fn signed_bytes(id: u32, key: &X25519PublicKey) -> [u8; 46] {
        let mut bytes = [0u8; 46];
        bytes[..10].copy_from_slice(ONE_TIME_KEY_SIGNATURE_PREFIX);
        bytes[10..14].copy_from_slice(&id.to_be_bytes());
        bytes[14..].copy_from_slice(key.as_bytes());

        bytes
    }

    /// Checks that `owner` signed this key.
    pub fn verify(&self, owner: &IdentityKeys) -> Result<(), Error> {
        owner.verify(&Self::signed_bytes(self.id, &self.key), &self.signature)
    }
}

/// A one-time pre-key as held by its owner.
///
/// `published` flips once the key has been handed out in a bundle; `used`
/// flips when an inbound session consumed it. Used keys never back a second
/// session.
#[derive(Clone)]
pub(crate) struct OneTimePreKey {
    pub(crate) id: u32,
    pub(crate) key: X25519Secret,
    pub(crate) published: bool,
    pub(crate) used: bool,
}

impl OneTimePreKey {
    pub(crate) fn new(id: u32, seed: &[u8; 32]) -> Self {
        Self {
            id,
            key: X25519Secret::from(seed),
            published: false,
            used: false,
        }
    }

    pub(crate) fn public_key(&self) -> X25519PublicKey {
        self.key.public_key()
    }

    pub(crate) fn signed(&self, identity: &IdentityKey) -> SignedOneTimeKey {
        let key = self.public_key();
        let signature = identity.sign(&SignedOneTimeKey::signed_bytes(self.id, &key));

        SignedOneTimeKey {
            id: self.id,
            key,
            signature,
        }
    }
}

impl Zeroize for OneTimePreKey {
    fn zeroize(&mut self) {
        self.key.zeroize();
    }
}

impl ZeroizeOnDrop for OneTimePreKey {}

/// Bounded, ordered pool of one-time pre-keys.
///
/// Ids increase strictly and are never reused, so iteration order is
/// creation order.
#[derive(Clone)]
pub(crate) struct OneTimePreKeyStore {
    pub(crate) keys: BTreeMap<u32, OneTimePreKey>,
    pub(crate) next_id: u32,
    pub(crate) max_keys: usize,
}

impl OneTimePreKeyStore {
    pub(crate) fn new(max_keys: usize) -> Self {
        Self {
            keys: BTreeMap::new(),
            next_id: 1,
            max_keys,
        }
    }

    /// How many new keys fit once every evictable key is gone.
    pub(crate) fn room(&self, requested: usize) -> usize {
        let used = self.keys.values().filter(|key| key.used).count();
        requested.min(self.max_keys.saturating_sub(used))
    }

    /// Adds one key per 32-byte seed, evicting old unused keys to stay within
    /// capacity. `seeds` must not hold more keys than [`Self::room`] allows.
    pub(crate) fn generate_keys(&mut self, seeds: &[u8]) -> Result<Vec<u32>, Error> {
        let count = seeds.len() / 32;
        let count_u32 = u32::try_from(count)
            .map_err(|_| Error::Crypto("Too many one-time keys requested".to_string()))?;
        self.next_id
            .checked_add(count_u32)
            .ok_or_else(|| Error::Crypto("One-time key ids exhausted".to_string()))?;

        while self.keys.len() + count > self.max_keys {
            let Some(id) = self.eviction_candidate() else {
                break;
            };
            debug!(key_id = id, "Evicting one-time key to make room");
            self.keys.remove(&id);
        }

        let mut ids = Vec::with_capacity(count);
        for chunk in seeds.chunks_exact(32) {
            let mut seed = [0u8; 32];
            seed.copy_from_slice(chunk);

            let id = self.next_id;
            self.keys.insert(id, OneTimePreKey::new(id, &seed));
            self.next_id += 1;
            ids.push(id);

            seed.zeroize();
        }

        Ok(ids)
    }

    /// Oldest unpublished unused key, otherwise the oldest unused one.
    fn eviction_candidate(&self) -> Option<u32> {
        self.keys
            .values()
            .find(|key| !key.used && !key.published)
            .or_else(|| self.keys.values().find(|key| !key.used))
            .map(|key| key.id)
    }

    pub(crate) fn get(&self, id: u32) -> Option<&OneTimePreKey> {
        self.keys.get(&id)
    }

    /// Looks up a key that may still back a new session.
    pub(crate) fn get_unused(&self, id: u32) -> Result<&OneTimePreKey, Error> {
        self.keys
            .get(&id)
            .filter(|key| !key.used)
            .ok_or(Error::UnknownOneTimeKey(id))
    }

    pub(crate) fn mark_used(&mut self, id: u32) {
        if let Some(key) = self.keys.get_mut(&id) {
            key.used = true;
        }
    }

    pub(crate) fn remove(&mut self, id: u32) -> Option<OneTimePreKey> {
        self.keys.remove(&id)
    }

    pub(crate) fn unpublished(&self) -> impl Iterator<Item = &OneTimePreKey> {
        self.keys.values().filter(|key| !key.published && !key.used)
    }

    pub(crate) fn mark_published(&mut self) {
        for key in self.keys.values_mut() {
            key.published = true;
        }
    }
}

impl Zeroize for OneTimePreKeyStore {
    fn zeroize(&mut self) {
        for key in self.keys.values_mut() {
            key.zeroize();
        }
        self.keys.clear();
    }
}
