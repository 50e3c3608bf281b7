mod config;
pub use config::{AccountConfig, SessionConfig};
mod session;
pub use session::{Role, Session, SessionKeys};

use crate::crypto::random_bytes;
use crate::ratchet::{AD_LEN, DoubleRatchet, PreKeyMessage};
use crate::types::{Ed25519Signature, X25519PublicKey, X25519Secret};
use crate::x3dh::{IdentityKey, IdentityKeys, OneTimePreKeyStore, SignedOneTimeKey, X3DH};
use crate::Error;
use rand::TryCryptoRng;
use rand::rngs::OsRng;
use std::collections::BTreeMap;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The public half of an account: what a peer needs to open a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityBundle {
    /// The account's long-term identity.
    pub identity_keys: IdentityKeys,
    /// Signed one-time keys that have not been published yet, by id.
    pub one_time_keys: BTreeMap<u32, SignedOneTimeKey>,
}

/// A long-term identity and its pool of one-time pre-keys.
///
/// Sessions are created from an account but do not borrow it, so the account
/// can be stored and the sessions used independently. Like [`Session`], an
/// account must be owned by one user at a time.
pub struct Account {
    pub(crate) identity_key: IdentityKey,
    pub(crate) one_time_keys: OneTimePreKeyStore,
    pub(crate) config: AccountConfig,
}

fn associated_data(initiator: &X25519PublicKey, responder: &X25519PublicKey) -> [u8; AD_LEN] {
    let mut ad = [0u8; AD_LEN];
    ad[..32].copy_from_slice(initiator.as_bytes());
    ad[32..].copy_from_slice(responder.as_bytes());

    ad
}

impl Account {
    /// Creates an account with a fresh identity and no one-time keys.
    ///
    /// If no configuration is provided, default values are used.
    pub fn new(config: Option<AccountConfig>) -> Result<Self, Error> {
        Self::new_with_rng(config, &mut OsRng)
    }

    /// [`Self::new`] drawing the identity from `rng`.
    pub fn new_with_rng<R>(config: Option<AccountConfig>, rng: &mut R) -> Result<Self, Error>
    where
        R: TryCryptoRng + ?Sized,
    {
        let config = config.unwrap_or_default();

        let bytes = random_bytes(rng, 64)?;
        let mut seed = [0u8; 64];
        seed.copy_from_slice(&bytes);
        let identity_key = IdentityKey::from_seed(&seed);
        seed.zeroize();

        debug!(
            max_one_time_keys = config.max_one_time_keys,
            "Created account"
        );

        Ok(Self {
            identity_key,
            one_time_keys: OneTimePreKeyStore::new(config.max_one_time_keys),
            config,
        })
    }

    /// Returns the configuration for this account.
    pub fn config(&self) -> &AccountConfig {
        &self.config
    }

    /// Capacity of the one-time key pool.
    pub fn max_one_time_keys(&self) -> usize {
        self.config.max_one_time_keys
    }

    pub fn identity_keys(&self) -> IdentityKeys {
        self.identity_key.public_keys()
    }

    /// Signs `message` with the identity key.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        self.identity_key.sign(message)
    }

    /// Generates up to `count` one-time keys and returns their ids.
    ///
    /// When the pool is full, old unused keys are evicted: unpublished ones
    /// first, then published ones. Keys consumed by a session are never
    /// evicted, so fewer than `count` keys are created when they fill the
    /// pool.
    pub fn generate_one_time_keys(&mut self, count: usize) -> Result<Vec<u32>, Error> {
        self.generate_one_time_keys_with_rng(count, &mut OsRng)
    }

    /// [`Self::generate_one_time_keys`] drawing key material from `rng`.
    pub fn generate_one_time_keys_with_rng<R>(
        &mut self,
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<u32>, Error>
    where
        R: TryCryptoRng + ?Sized,
    {
        let count = self.one_time_keys.room(count);
        let len = count
            .checked_mul(32)
            .ok_or_else(|| Error::Crypto("Too many one-time keys requested".to_string()))?;

        let seeds = random_bytes(rng, len)?;
        let ids = self.one_time_keys.generate_keys(&seeds)?;

        debug!(count = ids.len(), "Generated one-time keys");

        Ok(ids)
    }

    /// Signed public halves of the one-time keys not yet published.
    pub fn one_time_keys(&self) -> BTreeMap<u32, SignedOneTimeKey> {
        self.one_time_keys
            .unpublished()
            .map(|key| (key.id, key.signed(&self.identity_key)))
            .collect()
    }

    /// The identity keys together with every unpublished one-time key.
    ///
    /// Publication state only changes through [`Self::mark_published`].
    pub fn identity_bundle(&self) -> IdentityBundle {
        IdentityBundle {
            identity_keys: self.identity_keys(),
            one_time_keys: self.one_time_keys(),
        }
    }

    /// Marks every current one-time key as published.
    pub fn mark_published(&mut self) {
        self.one_time_keys.mark_published();
    }

    /// Opens a session to the owner of `their_identity_keys`, consuming one of
    /// their published one-time keys.
    pub fn create_outbound_session(
        &self,
        their_identity_keys: &IdentityKeys,
        their_one_time_key: &SignedOneTimeKey,
    ) -> Result<Session, Error> {
        self.create_outbound_session_with_rng(their_identity_keys, their_one_time_key, &mut OsRng)
    }

    /// [`Self::create_outbound_session`] drawing the base and ratchet keys
    /// from `rng`.
    pub fn create_outbound_session_with_rng<R>(
        &self,
        their_identity_keys: &IdentityKeys,
        their_one_time_key: &SignedOneTimeKey,
        rng: &mut R,
    ) -> Result<Session, Error>
    where
        R: TryCryptoRng + ?Sized,
    {
        their_one_time_key.verify(their_identity_keys)?;

        let seeds = random_bytes(rng, 64)?;
        let mut base_seed = [0u8; 32];
        base_seed.copy_from_slice(&seeds[..32]);
        let mut ratchet_seed = [0u8; 32];
        ratchet_seed.copy_from_slice(&seeds[32..]);
        let base_key = X25519Secret::from(&base_seed);
        let ratchet_key = X25519Secret::from(&ratchet_seed);
        base_seed.zeroize();
        ratchet_seed.zeroize();

        let shared_secret = X3DH::new(&self.config.protocol_info).initiate(
            &self.identity_key,
            &base_key,
            &their_identity_keys.curve25519,
            &their_one_time_key.key,
        )?;

        let our_identity = self.identity_key.dh_key_public();
        let ratchet = DoubleRatchet::initialize_as_initiator(
            shared_secret,
            ratchet_key,
            associated_data(&our_identity, &their_identity_keys.curve25519),
            &self.config.session_config(),
        )?;

        let session_keys = SessionKeys {
            identity_key: our_identity,
            base_key: base_key.public_key(),
            one_time_key: their_one_time_key.key,
            one_time_key_id: their_one_time_key.id,
        };
        let session = Session::new(
            session_keys,
            their_identity_keys.curve25519,
            Role::Initiator,
            ratchet,
        );

        debug!(
            session_id = %session.session_id(),
            one_time_key_id = their_one_time_key.id,
            "Created outbound session"
        );

        Ok(session)
    }

    /// Creates the responder side of a session from a received pre-key
    /// message.
    ///
    /// The message is trial-decrypted before the referenced one-time key is
    /// marked used, so a forged message cannot burn a key. The returned
    /// session has not consumed the message: decrypt it with
    /// [`Session::decrypt`] as usual.
    pub fn create_inbound_session(&mut self, message: &[u8]) -> Result<Session, Error> {
        let message = PreKeyMessage::from_bytes(message)?;
        self.create_inbound(&message)
    }

    /// [`Self::create_inbound_session`], failing with [`Error::KeyMismatch`]
    /// unless the message comes from `their_identity_key`.
    pub fn create_inbound_session_from(
        &mut self,
        their_identity_key: &X25519PublicKey,
        message: &[u8],
    ) -> Result<Session, Error> {
        let message = PreKeyMessage::from_bytes(message)?;
        if message.identity_key != *their_identity_key {
            return Err(Error::KeyMismatch);
        }

        self.create_inbound(&message)
    }

    fn create_inbound(&mut self, message: &PreKeyMessage) -> Result<Session, Error> {
        let one_time_key = self.one_time_keys.get_unused(message.one_time_key_id)?;

        let shared_secret = X3DH::new(&self.config.protocol_info).respond(
            &self.identity_key,
            &one_time_key.key,
            &message.identity_key,
            &message.base_key,
        )?;

        let ratchet = DoubleRatchet::initialize_as_responder(
            shared_secret,
            message.message.ratchet_key,
            associated_data(&message.identity_key, &self.identity_key.dh_key_public()),
            &self.config.session_config(),
        )?;

        ratchet.clone().decrypt(&message.message)?;

        let session_keys = SessionKeys {
            identity_key: message.identity_key,
            base_key: message.base_key,
            one_time_key: one_time_key.public_key(),
            one_time_key_id: message.one_time_key_id,
        };
        self.one_time_keys.mark_used(message.one_time_key_id);

        let session = Session::new(session_keys, message.identity_key, Role::Responder, ratchet);

        debug!(
            session_id = %session.session_id(),
            one_time_key_id = message.one_time_key_id,
            "Created inbound session"
        );

        Ok(session)
    }

    /// Forgets the one-time key consumed by `session` once the session is
    /// stored safely.
    pub fn remove_one_time_keys(&mut self, session: &Session) -> Result<(), Error> {
        let keys = session.session_keys;
        let matches = self
            .one_time_keys
            .get(keys.one_time_key_id)
            .is_some_and(|key| key.public_key() == keys.one_time_key);

        if !matches {
            return Err(Error::UnknownOneTimeKey(keys.one_time_key_id));
        }

        self.one_time_keys.remove(keys.one_time_key_id);
        debug!(key_id = keys.one_time_key_id, "Removed one-time key");

        Ok(())
    }
}

impl Zeroize for Account {
    fn zeroize(&mut self) {
        self.identity_key.zeroize();
        self.one_time_keys.zeroize();
    }
}

impl ZeroizeOnDrop for Account {}
