use crate::MessageType;

/// Errors returned by account, session and pickle operations.
///
/// Every variant is handed back to the immediate caller; nothing is logged and
/// swallowed, and no input can make the crate abort the process.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// The random source could not supply the bytes an operation needed.
    ///
    /// The operation was abandoned before any state changed, so it can be
    /// retried once the source recovers.
    #[error("Random source could not supply enough bytes")]
    InsufficientRandomness,

    /// A wire message could not be parsed.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A pre-key message referenced a one-time key this account does not hold,
    /// or one that was already consumed by another session.
    #[error("Unknown one-time key: {0}")]
    UnknownOneTimeKey(u32),

    /// The declared message type disagrees with the message itself, or the
    /// session cannot accept that type of message.
    #[error("Message type mismatch: expected {expected:?}, found {found:?}")]
    MessageTypeMismatch {
        /// The type the caller or session expected.
        expected: MessageType,
        /// The type that was actually presented.
        found: MessageType,
    },

    /// Authentication of a message failed.
    #[error("Message could not be decrypted")]
    DecryptFailure,

    /// A message counter lies further ahead than the configured skip limit.
    #[error("Too many skipped messages: {requested} requested, limit is {max}")]
    TooManySkippedMessages {
        /// Number of message keys the message would have required skipping.
        requested: u32,
        /// The configured limit.
        max: u32,
    },

    /// A pickle failed authentication: wrong passphrase, wrong pickle kind or
    /// a corrupted blob.
    #[error("Pickle could not be authenticated")]
    BadPickleKey,

    /// The pickle was written by an unknown format version.
    #[error("Unsupported pickle version: {0}")]
    UnsupportedPickleVersion(u8),

    /// An authenticated pickle carried state that does not decode.
    #[error("Corrupted pickle: {0}")]
    CorruptedPickle(String),

    /// A key presented by a peer does not match the one this account or
    /// session was bound to.
    #[error("Key mismatch")]
    KeyMismatch,

    /// An Ed25519 signature did not verify.
    #[error("Bad signature")]
    BadSignature,

    /// A cryptographic primitive rejected its input.
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

impl From<aes_gcm_siv::Error> for Error {
    fn from(_: aes_gcm_siv::Error) -> Self {
        Self::DecryptFailure
    }
}

impl From<hkdf::InvalidLength> for Error {
    fn from(value: hkdf::InvalidLength) -> Self {
        Self::Crypto(value.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(value: prost::DecodeError) -> Self {
        Self::CorruptedPickle(value.to_string())
    }
}
