use crate::crypto::sha256;
use crate::ratchet::{DoubleRatchet, Message, MessageType, NormalMessage, PreKeyMessage};
use crate::types::X25519PublicKey;
use crate::Error;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::TryCryptoRng;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Which side of the initial key agreement a session was created on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Created from a peer's published keys; frames its messages as pre-key
    /// messages until the peer replies.
    Initiator,
    /// Created from a received pre-key message.
    Responder,
}

/// The public keys that established a session.
///
/// Both peers hold identical values, so they identify the session on both
/// sides.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionKeys {
    /// The initiator's Curve25519 identity key.
    pub identity_key: X25519PublicKey,
    /// The initiator's ephemeral key.
    pub base_key: X25519PublicKey,
    /// The responder's one-time key that was consumed.
    pub one_time_key: X25519PublicKey,
    /// Id of that one-time key.
    pub one_time_key_id: u32,
}

impl SessionKeys {
    /// Base64 of the SHA-256 hash over the identity, base and one-time keys.
    pub fn session_id(&self) -> String {
        let digest = sha256(&[
            self.identity_key.as_bytes(),
            self.base_key.as_bytes(),
            self.one_time_key.as_bytes(),
        ]);

        STANDARD.encode(digest)
    }

    /// Whether `message` was produced by the session these keys established.
    fn matches(&self, message: &PreKeyMessage) -> bool {
        let identity = self
            .identity_key
            .as_bytes()
            .as_slice()
            .ct_eq(message.identity_key.as_bytes().as_slice());
        let base_key = self
            .base_key
            .as_bytes()
            .as_slice()
            .ct_eq(message.base_key.as_bytes().as_slice());
        let key_id = self.one_time_key_id.ct_eq(&message.one_time_key_id);

        (identity & base_key & key_id).into()
    }
}

/// An end-to-end encrypted channel with one peer.
///
/// A session is bound to the peer identity it was created with for its
/// whole lifetime. It is not internally synchronized: callers hand out
/// `&mut Session` to one user at a time.
pub struct Session {
    pub(crate) session_keys: SessionKeys,
    pub(crate) remote_identity_key: X25519PublicKey,
    pub(crate) role: Role,
    pub(crate) received_message: bool,
    pub(crate) ratchet: DoubleRatchet,
}

impl Session {
    pub(crate) fn new(
        session_keys: SessionKeys,
        remote_identity_key: X25519PublicKey,
        role: Role,
        ratchet: DoubleRatchet,
    ) -> Self {
        Self {
            session_keys,
            remote_identity_key,
            role,
            received_message: false,
            ratchet,
        }
    }

    /// Stable identifier of this session, equal on both peers.
    pub fn session_id(&self) -> String {
        self.session_keys.session_id()
    }

    pub fn session_keys(&self) -> SessionKeys {
        self.session_keys
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether a message from the peer has been decrypted yet.
    pub fn has_received_message(&self) -> bool {
        self.received_message
    }

    /// Curve25519 identity key of the peer this session is bound to.
    pub fn remote_identity_key(&self) -> X25519PublicKey {
        self.remote_identity_key
    }

    /// Encrypts `plaintext` for the peer.
    ///
    /// Returns the message type and bytes to hand to the transport. Until the
    /// peer has replied, an initiator wraps every message in a pre-key message
    /// so that any of them can establish the session on the other side.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<(MessageType, Vec<u8>), Error> {
        self.encrypt_with_rng(plaintext, &mut OsRng)
    }

    /// [`Self::encrypt`] drawing randomness from `rng`.
    pub fn encrypt_with_rng<R>(
        &mut self,
        plaintext: &[u8],
        rng: &mut R,
    ) -> Result<(MessageType, Vec<u8>), Error>
    where
        R: TryCryptoRng + ?Sized,
    {
        let message = self.ratchet.encrypt(plaintext, rng)?;

        let message = if self.role == Role::Initiator && !self.received_message {
            Message::PreKey(PreKeyMessage {
                one_time_key_id: self.session_keys.one_time_key_id,
                identity_key: self.session_keys.identity_key,
                base_key: self.session_keys.base_key,
                message,
            })
        } else {
            Message::Normal(message)
        };

        Ok(message.to_parts())
    }

    /// Decrypts a message received from the peer.
    ///
    /// Nothing changes unless decryption succeeds, so a failed message can be
    /// retried or dropped without desynchronizing the session.
    pub fn decrypt(&mut self, message_type: MessageType, message: &[u8]) -> Result<Vec<u8>, Error> {
        let message = Message::from_parts(message_type, message)?;
        let inner = self.inner_message(&message)?;

        let plaintext = self.ratchet.decrypt(inner)?;

        if !self.received_message {
            debug!(session_id = %self.session_id(), "First message received");
            self.received_message = true;
        }

        Ok(plaintext)
    }

    fn inner_message<'a>(&self, message: &'a Message) -> Result<&'a NormalMessage, Error> {
        match message {
            Message::Normal(message) => Ok(message),
            Message::PreKey(_) if self.role == Role::Initiator => {
                Err(Error::MessageTypeMismatch {
                    expected: MessageType::Normal,
                    found: MessageType::PreKey,
                })
            }
            Message::PreKey(message) if self.session_keys.matches(message) => {
                Ok(&message.message)
            }
            Message::PreKey(_) => Err(Error::KeyMismatch),
        }
    }

    /// Whether the pre-key message in `message` belongs to this session.
    ///
    /// Malformed input never matches.
    pub fn matches_inbound(&self, message: &[u8]) -> bool {
        PreKeyMessage::from_bytes(message).is_ok_and(|message| self.session_keys.matches(&message))
    }

    /// [`Self::matches_inbound`], additionally requiring the message to come
    /// from `their_identity_key`.
    pub fn matches_inbound_from(&self, their_identity_key: &X25519PublicKey, message: &[u8]) -> bool {
        PreKeyMessage::from_bytes(message).is_ok_and(|message| {
            let sender: bool = their_identity_key
                .as_bytes()
                .as_slice()
                .ct_eq(message.identity_key.as_bytes().as_slice())
                .into();

            sender & self.session_keys.matches(&message)
        })
    }
}

impl Zeroize for Session {
    fn zeroize(&mut self) {
        self.ratchet.zeroize();
        self.received_message = false;
    }
}

impl ZeroizeOnDrop for Session {}
