use crate::Error;
use crate::types::X25519PublicKey;

const VERSION: u8 = 0x01;
const TAG_SIZE: usize = 16;

/// version | kind | ratchet key | counter | previous counter
pub(crate) const HEADER_LEN: usize = 2 + 32 + 4 + 4;
/// version | kind | one-time key id | identity key | base key
const PRE_KEY_PREFIX_LEN: usize = 2 + 4 + 32 + 32;

/// Wire discriminant of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Session-establishing message sent by the initiator until it hears back.
    PreKey = 0,
    /// Ordinary ratchet message.
    Normal = 1,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::PreKey => 0,
            Self::Normal => 1,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::PreKey),
            1 => Ok(Self::Normal),
            other => Err(Error::MalformedMessage(format!(
                "Unknown message type {other}"
            ))),
        }
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, Error> {
    bytes
        .get(offset..offset + 4)
        .and_then(|slice| <[u8; 4]>::try_from(slice).ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| Error::MalformedMessage("Message is truncated".to_string()))
}

fn read_key(bytes: &[u8], offset: usize) -> Result<X25519PublicKey, Error> {
    bytes
        .get(offset..offset + 32)
        .and_then(|slice| <[u8; 32]>::try_from(slice).ok())
        .map(X25519PublicKey::from)
        .ok_or_else(|| Error::MalformedMessage("Message is truncated".to_string()))
}

/// Checks the version byte and returns the kind byte as a message type.
fn read_prefix(bytes: &[u8]) -> Result<MessageType, Error> {
    match bytes {
        [VERSION, kind, ..] => MessageType::try_from(*kind),
        [version, _, ..] => Err(Error::MalformedMessage(format!(
            "Unsupported message version {version}"
        ))),
        _ => Err(Error::MalformedMessage("Message is truncated".to_string())),
    }
}

fn expect_type(bytes: &[u8], expected: MessageType) -> Result<(), Error> {
    let found = read_prefix(bytes)?;
    if found != expected {
        return Err(Error::MessageTypeMismatch { expected, found });
    }

    Ok(())
}

/// An ordinary ratchet message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalMessage {
    pub(crate) ratchet_key: X25519PublicKey,
    pub(crate) counter: u32,
    pub(crate) previous_counter: u32,
    pub(crate) ciphertext: Vec<u8>,
}

impl NormalMessage {
    /// The sender's current ratchet public key.
    pub fn ratchet_key(&self) -> X25519PublicKey {
        self.ratchet_key
    }

    /// Position of this message in the sender's current chain.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Length of the sender's previous sending chain.
    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// The authenticated header: every byte preceding the ciphertext.
    pub(crate) fn header_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0] = VERSION;
        bytes[1] = MessageType::Normal.as_u8();
        bytes[2..34].copy_from_slice(self.ratchet_key.as_bytes());
        bytes[34..38].copy_from_slice(&self.counter.to_be_bytes());
        bytes[38..42].copy_from_slice(&self.previous_counter.to_be_bytes());

        bytes
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        bytes.extend_from_slice(&self.header_bytes());
        bytes.extend_from_slice(&self.ciphertext);

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        expect_type(bytes, MessageType::Normal)?;

        let ratchet_key = read_key(bytes, 2)?;
        let counter = read_u32(bytes, 34)?;
        let previous_counter = read_u32(bytes, 38)?;

        let ciphertext = bytes.get(HEADER_LEN..).unwrap_or_default();
        if ciphertext.len() < TAG_SIZE {
            return Err(Error::MalformedMessage(
                "Ciphertext is shorter than its tag".to_string(),
            ));
        }

        Ok(Self {
            ratchet_key,
            counter,
            previous_counter,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// A session-establishing message: the initiator's keys plus the first
/// ratchet message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeyMessage {
    pub(crate) one_time_key_id: u32,
    pub(crate) identity_key: X25519PublicKey,
    pub(crate) base_key: X25519PublicKey,
    pub(crate) message: NormalMessage,
}

impl PreKeyMessage {
    /// Id of the responder's one-time key this message consumes.
    pub fn one_time_key_id(&self) -> u32 {
        self.one_time_key_id
    }

    /// The initiator's Curve25519 identity key.
    pub fn identity_key(&self) -> X25519PublicKey {
        self.identity_key
    }

    /// The initiator's ephemeral key for this session.
    pub fn base_key(&self) -> X25519PublicKey {
        self.base_key
    }

    pub fn message(&self) -> &NormalMessage {
        &self.message
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let inner = self.message.to_bytes();
        let mut bytes = Vec::with_capacity(PRE_KEY_PREFIX_LEN + inner.len());
        bytes.push(VERSION);
        bytes.push(MessageType::PreKey.as_u8());
        bytes.extend_from_slice(&self.one_time_key_id.to_be_bytes());
        bytes.extend_from_slice(self.identity_key.as_bytes());
        bytes.extend_from_slice(self.base_key.as_bytes());
        bytes.extend_from_slice(&inner);

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        expect_type(bytes, MessageType::PreKey)?;

        let one_time_key_id = read_u32(bytes, 2)?;
        let identity_key = read_key(bytes, 6)?;
        let base_key = read_key(bytes, 38)?;
        let inner = bytes.get(PRE_KEY_PREFIX_LEN..).unwrap_or_default();
        let message = NormalMessage::from_bytes(inner).map_err(|err| match err {
            Error::MessageTypeMismatch { .. } => {
                Error::MalformedMessage("Pre-key message must wrap a normal message".to_string())
            }
            other => other,
        })?;

        Ok(Self {
            one_time_key_id,
            identity_key,
            base_key,
            message,
        })
    }
}

/// Either of the two payload shapes exchanged between peers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    PreKey(PreKeyMessage),
    Normal(NormalMessage),
}

impl Message {
    /// Parses a message whose type travels separately from its bytes.
    ///
    /// Fails with [`Error::MessageTypeMismatch`] when the bytes encode the
    /// other kind of message.
    pub fn from_parts(message_type: MessageType, bytes: &[u8]) -> Result<Self, Error> {
        match message_type {
            MessageType::PreKey => PreKeyMessage::from_bytes(bytes).map(Self::PreKey),
            MessageType::Normal => NormalMessage::from_bytes(bytes).map(Self::Normal),
        }
    }

    /// Parses a message, taking its type from the encoded kind byte.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Self::from_parts(read_prefix(bytes)?, bytes)
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::PreKey(_) => MessageType::PreKey,
            Self::Normal(_) => MessageType::Normal,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::PreKey(message) => message.to_bytes(),
            Self::Normal(message) => message.to_bytes(),
        }
    }

    /// The type and bytes as handed to the transport.
    pub fn to_parts(&self) -> (MessageType, Vec<u8>) {
        (self.message_type(), self.to_bytes())
    }
}
