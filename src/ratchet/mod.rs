mod chain;
mod message;
mod skipped;

pub(crate) use chain::Chain;
pub use message::{Message, MessageType, NormalMessage, PreKeyMessage};
pub(crate) use skipped::{SkippedMessageKey, SkippedMessageKeys};

use crate::Error;
use crate::account::SessionConfig;
use crate::crypto::{AEAD_NONCE_SIZE, aead_decrypt, aead_encrypt, hkdf_sha256, random_seed};
use crate::types::{KeyMaterial, X25519PublicKey, X25519Secret};
use crate::x3dh::X3DHSharedSecret;
use rand::TryCryptoRng;
use tracing::{debug, trace};
use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const INIT_INFO: &[u8] = b"Parley-E2E-Init";
const ROOT_INFO: &[u8] = b"Parley-E2E-Root";
const MESSAGE_KEY_INFO: &[u8] = b"Parley-E2E-Keys";

/// Length of the associated data binding a session to both identities.
pub(crate) const AD_LEN: usize = 64;

/// Our current ratchet key pair and the chain it seeds.
#[derive(Clone)]
pub(crate) struct SendingChain {
    pub(crate) ratchet_key: X25519Secret,
    pub(crate) chain: Chain,
}

/// The peer's current ratchet public key and the chain derived from it.
#[derive(Clone)]
pub(crate) struct ReceivingChain {
    pub(crate) ratchet_key: X25519PublicKey,
    pub(crate) chain: Chain,
}

/// Key material of the ratchet.
///
/// `sending_chain` is `None` right after a DH ratchet step; the next
/// encryption creates a fresh ratchet key. At least one chain is always
/// present, and a missing sending chain implies a receiving chain.
#[derive(Clone)]
pub(crate) struct RatchetState {
    pub(crate) root_key: KeyMaterial,
    pub(crate) sending_chain: Option<SendingChain>,
    pub(crate) receiving_chain: Option<ReceivingChain>,
    /// Length of our previous sending chain, announced in message headers.
    pub(crate) previous_counter: u32,
}

impl Zeroize for RatchetState {
    fn zeroize(&mut self) {
        self.root_key.zeroize();
        self.sending_chain = None;
        self.receiving_chain = None;
        self.previous_counter = 0;
    }
}

/// Double ratchet over an agreed shared secret.
///
/// A DH ratchet step happens whenever the peer's messages arrive under a new
/// ratchet key; every message additionally advances a symmetric chain so
/// each message key is used once. Out-of-order messages are served from a
/// bounded cache of skipped message keys.
#[derive(Clone)]
pub(crate) struct DoubleRatchet {
    pub(crate) state: RatchetState,
    pub(crate) skipped_message_keys: SkippedMessageKeys,
    pub(crate) max_skip: u32,
    pub(crate) ad: [u8; AD_LEN],
}

impl Zeroize for DoubleRatchet {
    fn zeroize(&mut self) {
        self.state.zeroize();
        self.skipped_message_keys = SkippedMessageKeys::new(0);
    }
}

impl ZeroizeOnDrop for DoubleRatchet {}

impl DoubleRatchet {
    /// Initializes the initiator side. Its first sending chain comes straight
    /// from the shared secret, under the ratchet key announced in the first
    /// message.
    pub(crate) fn initialize_as_initiator(
        shared_secret: X3DHSharedSecret,
        ratchet_key: X25519Secret,
        ad: [u8; AD_LEN],
        config: &SessionConfig,
    ) -> Result<Self, Error> {
        let (root_key, chain_key) = Self::kdf_init(&shared_secret)?;

        Ok(Self {
            state: RatchetState {
                root_key,
                sending_chain: Some(SendingChain {
                    ratchet_key,
                    chain: Chain::new(chain_key),
                }),
                receiving_chain: None,
                previous_counter: 0,
            },
            skipped_message_keys: SkippedMessageKeys::new(config.max_skipped_message_keys),
            max_skip: config.max_skip,
            ad,
        })
    }

    /// Initializes the responder side from the initiator's first ratchet key.
    /// The responder creates its own ratchet key on its first encryption.
    pub(crate) fn initialize_as_responder(
        shared_secret: X3DHSharedSecret,
        their_ratchet_key: X25519PublicKey,
        ad: [u8; AD_LEN],
        config: &SessionConfig,
    ) -> Result<Self, Error> {
        let (root_key, chain_key) = Self::kdf_init(&shared_secret)?;

        Ok(Self {
            state: RatchetState {
                root_key,
                sending_chain: None,
                receiving_chain: Some(ReceivingChain {
                    ratchet_key: their_ratchet_key,
                    chain: Chain::new(chain_key),
                }),
                previous_counter: 0,
            },
            skipped_message_keys: SkippedMessageKeys::new(config.max_skipped_message_keys),
            max_skip: config.max_skip,
            ad,
        })
    }

    fn kdf_init(shared_secret: &X3DHSharedSecret) -> Result<(KeyMaterial, KeyMaterial), Error> {
        let mut okm = Zeroizing::new([0u8; 64]);
        hkdf_sha256(None, shared_secret.as_bytes(), INIT_INFO, okm.as_mut_slice())?;

        Ok(Self::split_keys(&okm))
    }

    /// Root KDF: mixes a DH output into the root key, yielding the new root
    /// key and a chain key.
    fn kdf_root(
        root_key: &KeyMaterial,
        dh_output: &SharedSecret,
    ) -> Result<(KeyMaterial, KeyMaterial), Error> {
        let mut okm = Zeroizing::new([0u8; 64]);
        hkdf_sha256(
            Some(root_key.as_bytes()),
            dh_output.as_bytes(),
            ROOT_INFO,
            okm.as_mut_slice(),
        )?;

        Ok(Self::split_keys(&okm))
    }

    fn split_keys(okm: &[u8; 64]) -> (KeyMaterial, KeyMaterial) {
        let mut first = KeyMaterial::default();
        first.as_mut_bytes().copy_from_slice(&okm[..32]);
        let mut second = KeyMaterial::default();
        second.as_mut_bytes().copy_from_slice(&okm[32..]);

        (first, second)
    }

    /// Encrypts `plaintext` under the next sending message key.
    ///
    /// Draws 32 bytes from `rng` only when a new ratchet key is due; those are
    /// drawn before any state changes.
    pub(crate) fn encrypt<R>(&mut self, plaintext: &[u8], rng: &mut R) -> Result<NormalMessage, Error>
    where
        R: TryCryptoRng + ?Sized,
    {
        let mut state = self.state.clone();

        let sending_chain = match state.sending_chain.take() {
            Some(sending_chain) => sending_chain,
            None => {
                let seed = random_seed(rng)?;
                let ratchet_key = X25519Secret::from(&*seed);
                let their_ratchet_key = state
                    .receiving_chain
                    .as_ref()
                    .map(|receiving| receiving.ratchet_key)
                    .ok_or_else(|| Error::Crypto("Ratchet has no remote key".to_string()))?;

                let (root_key, chain_key) =
                    Self::kdf_root(&state.root_key, &ratchet_key.dh(&their_ratchet_key))?;
                state.root_key = root_key;

                debug!("Created a new sending ratchet key");

                SendingChain {
                    ratchet_key,
                    chain: Chain::new(chain_key),
                }
            }
        };
        let sending_chain = state.sending_chain.insert(sending_chain);

        let counter = sending_chain.chain.index;
        let message_key = sending_chain.chain.next()?;

        let mut message = NormalMessage {
            ratchet_key: sending_chain.ratchet_key.public_key(),
            counter,
            previous_counter: state.previous_counter,
            ciphertext: Vec::new(),
        };
        message.ciphertext = self.seal(&message_key, plaintext, &message)?;

        trace!(counter, "Encrypted message");
        self.state = state;

        Ok(message)
    }

    /// Decrypts `message`, committing ratchet and cache changes only once
    /// the message authenticated.
    pub(crate) fn decrypt(&mut self, message: &NormalMessage) -> Result<Vec<u8>, Error> {
        let mut ratchet = self.clone();
        let plaintext = ratchet.decrypt_in_place(message)?;
        *self = ratchet;

        Ok(plaintext)
    }

    fn decrypt_in_place(&mut self, message: &NormalMessage) -> Result<Vec<u8>, Error> {
        if let Some(message_key) = self
            .skipped_message_keys
            .take(&message.ratchet_key, message.counter)
        {
            trace!(counter = message.counter, "Using a skipped message key");
            return self.open(&message_key, message);
        }

        let is_current_chain = self
            .state
            .receiving_chain
            .as_ref()
            .is_some_and(|receiving| receiving.ratchet_key == message.ratchet_key);

        if !is_current_chain {
            if let Some(receiving) = self.state.receiving_chain.as_mut() {
                skip_message_keys(
                    receiving,
                    &mut self.skipped_message_keys,
                    self.max_skip,
                    message.previous_counter,
                )?;
            }
            self.dh_ratchet(&message.ratchet_key)?;
        }

        let receiving = self
            .state
            .receiving_chain
            .as_mut()
            .ok_or(Error::DecryptFailure)?;

        // Key was already used, or skipped and evicted since
        if message.counter < receiving.chain.index {
            return Err(Error::DecryptFailure);
        }

        skip_message_keys(
            receiving,
            &mut self.skipped_message_keys,
            self.max_skip,
            message.counter,
        )?;
        let message_key = receiving.chain.next()?;

        trace!(counter = message.counter, "Decrypting message");
        self.open(&message_key, message)
    }

    /// Receiving half of a DH ratchet step: derives the receiving chain for
    /// `their_ratchet_key` and retires the current sending chain.
    fn dh_ratchet(&mut self, their_ratchet_key: &X25519PublicKey) -> Result<(), Error> {
        // Peers only rotate after hearing from us, so there must be a sending key
        let sending = self
            .state
            .sending_chain
            .take()
            .ok_or(Error::DecryptFailure)?;

        let (root_key, chain_key) =
            Self::kdf_root(&self.state.root_key, &sending.ratchet_key.dh(their_ratchet_key))?;

        self.state.root_key = root_key;
        self.state.previous_counter = sending.chain.index;
        self.state.receiving_chain = Some(ReceivingChain {
            ratchet_key: *their_ratchet_key,
            chain: Chain::new(chain_key),
        });

        debug!(
            previous_counter = self.state.previous_counter,
            "Performed DH ratchet step"
        );

        Ok(())
    }

    fn associated_data(&self, message: &NormalMessage) -> Vec<u8> {
        let header = message.header_bytes();
        let mut aad = Vec::with_capacity(AD_LEN + header.len());
        aad.extend_from_slice(&self.ad);
        aad.extend_from_slice(&header);

        aad
    }

    fn seal(
        &self,
        message_key: &KeyMaterial,
        plaintext: &[u8],
        message: &NormalMessage,
    ) -> Result<Vec<u8>, Error> {
        let (key, nonce) = cipher_keys(message_key)?;
        aead_encrypt(&key, &nonce, plaintext, &self.associated_data(message))
    }

    fn open(&self, message_key: &KeyMaterial, message: &NormalMessage) -> Result<Vec<u8>, Error> {
        let (key, nonce) = cipher_keys(message_key)?;
        aead_decrypt(
            &key,
            &nonce,
            &message.ciphertext,
            &self.associated_data(message),
        )
    }
}

/// Expands a message key into an AEAD key and nonce.
fn cipher_keys(
    message_key: &KeyMaterial,
) -> Result<(Zeroizing<[u8; 32]>, [u8; AEAD_NONCE_SIZE]), Error> {
    let mut okm = Zeroizing::new([0u8; 32 + AEAD_NONCE_SIZE]);
    hkdf_sha256(None, message_key.as_bytes(), MESSAGE_KEY_INFO, okm.as_mut_slice())?;

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&okm[..32]);
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    nonce.copy_from_slice(&okm[32..]);

    Ok((key, nonce))
}

/// Advances `receiving` up to `until`, caching every key passed over.
fn skip_message_keys(
    receiving: &mut ReceivingChain,
    skipped: &mut SkippedMessageKeys,
    max_skip: u32,
    until: u32,
) -> Result<(), Error> {
    let Some(requested) = until.checked_sub(receiving.chain.index) else {
        return Ok(());
    };
    if requested > max_skip {
        return Err(Error::TooManySkippedMessages {
            requested,
            max: max_skip,
        });
    }

    while receiving.chain.index < until {
        let index = receiving.chain.index;
        let message_key = receiving.chain.next()?;
        skipped.insert(SkippedMessageKey {
            ratchet_key: receiving.ratchet_key,
            index,
            message_key,
        });
    }

    if requested > 0 {
        trace!(requested, cached = skipped.len(), "Skipped message keys");
    }

    Ok(())
}
