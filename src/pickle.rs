//! Passphrase-encrypted persistence of accounts and sessions.
//!
//! A pickle is laid out as
//!
//! ```text
//! version (1) | salt (16) | nonce (12) | AES-256-GCM-SIV(state) with tag (16)
//! ```
//!
//! The encryption key is derived from the passphrase and salt with
//! HKDF-SHA-256. The version byte and the kind of pickled object are bound in
//! as associated data, so an account pickle never opens as a session.

use crate::account::{Account, Session};
use crate::crypto::{AEAD_NONCE_SIZE, aead_decrypt, aead_encrypt, hkdf_sha256, random_bytes};
use crate::proto::{AccountPickle, SessionPickle};
use crate::Error;
use prost::Message;
use rand::TryCryptoRng;
use rand::rngs::OsRng;
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

const PICKLE_VERSION: u8 = 0x01;
const SALT_LEN: usize = 16;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + SALT_LEN + AEAD_NONCE_SIZE;
const PICKLE_KEY_INFO: &[u8] = b"Parley-Pickle-Key";

const ACCOUNT_KIND: &[u8] = b"account";
const SESSION_KIND: &[u8] = b"session";

fn derive_key(passphrase: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, Error> {
    let mut key = Zeroizing::new([0u8; 32]);
    hkdf_sha256(Some(salt), passphrase, PICKLE_KEY_INFO, key.as_mut_slice())?;

    Ok(key)
}

fn aad(kind: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(1 + kind.len());
    aad.push(PICKLE_VERSION);
    aad.extend_from_slice(kind);

    aad
}

/// Encrypts `state` into a pickle of the given kind.
fn seal<R>(kind: &[u8], state: &[u8], passphrase: &[u8], rng: &mut R) -> Result<Vec<u8>, Error>
where
    R: TryCryptoRng + ?Sized,
{
    let random = random_bytes(rng, SALT_LEN + AEAD_NONCE_SIZE)?;
    let (salt, nonce_bytes) = random.split_at(SALT_LEN);
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    nonce.copy_from_slice(nonce_bytes);

    let key = derive_key(passphrase, salt)?;
    let ciphertext = aead_encrypt(&key, &nonce, state, &aad(kind))?;

    let mut pickle = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    pickle.push(PICKLE_VERSION);
    pickle.extend_from_slice(salt);
    pickle.extend_from_slice(&nonce);
    pickle.extend_from_slice(&ciphertext);

    Ok(pickle)
}

/// Authenticates and decrypts a pickle of the given kind.
fn open(kind: &[u8], pickle: &[u8], passphrase: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
    match pickle.first() {
        Some(&PICKLE_VERSION) => {}
        Some(&version) => return Err(Error::UnsupportedPickleVersion(version)),
        None => return Err(Error::BadPickleKey),
    }
    if pickle.len() < HEADER_LEN + TAG_LEN {
        return Err(Error::BadPickleKey);
    }

    let salt = &pickle[1..1 + SALT_LEN];
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    nonce.copy_from_slice(&pickle[1 + SALT_LEN..HEADER_LEN]);

    let key = derive_key(passphrase, salt)?;
    let state = aead_decrypt(&key, &nonce, &pickle[HEADER_LEN..], &aad(kind))
        .map_err(|_| Error::BadPickleKey)?;

    Ok(Zeroizing::new(state))
}

impl Account {
    /// Encrypts the complete account state under `passphrase`.
    pub fn pickle(&self, passphrase: &[u8]) -> Result<Vec<u8>, Error> {
        self.pickle_with_rng(passphrase, &mut OsRng)
    }

    /// [`Self::pickle`] drawing the salt and nonce from `rng`.
    pub fn pickle_with_rng<R>(&self, passphrase: &[u8], rng: &mut R) -> Result<Vec<u8>, Error>
    where
        R: TryCryptoRng + ?Sized,
    {
        let mut proto = self.to_proto();
        let state = Zeroizing::new(proto.encode_to_vec());
        proto.zeroize();

        let pickle = seal(ACCOUNT_KIND, &state, passphrase, rng)?;
        debug!(len = pickle.len(), "Pickled account");

        Ok(pickle)
    }

    /// Restores an account from [`Self::pickle`] output.
    pub fn from_pickle(passphrase: &[u8], pickle: &[u8]) -> Result<Self, Error> {
        let state = open(ACCOUNT_KIND, pickle, passphrase)?;
        let mut proto = AccountPickle::decode(state.as_slice())?;
        let account = Self::from_proto(&proto);
        proto.zeroize();

        account
    }
}

impl Session {
    /// Encrypts the complete session state, including skipped message keys,
    /// under `passphrase`.
    pub fn pickle(&self, passphrase: &[u8]) -> Result<Vec<u8>, Error> {
        self.pickle_with_rng(passphrase, &mut OsRng)
    }

    /// [`Self::pickle`] drawing the salt and nonce from `rng`.
    pub fn pickle_with_rng<R>(&self, passphrase: &[u8], rng: &mut R) -> Result<Vec<u8>, Error>
    where
        R: TryCryptoRng + ?Sized,
    {
        let mut proto = self.to_proto();
        let state = Zeroizing::new(proto.encode_to_vec());
        proto.zeroize();

        let pickle = seal(SESSION_KIND, &state, passphrase, rng)?;
        debug!(session_id = %self.session_id(), "Pickled session");

        Ok(pickle)
    }

    /// Restores a session from [`Self::pickle`] output.
    pub fn from_pickle(passphrase: &[u8], pickle: &[u8]) -> Result<Self, Error> {
        let state = open(SESSION_KIND, pickle, passphrase)?;
        let mut proto = SessionPickle::decode(state.as_slice())?;
        let session = Self::from_proto(&proto);
        proto.zeroize();

        session
    }
}
