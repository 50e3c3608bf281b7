//! Persisted state of accounts and sessions.
//!
//! These messages are only ever stored inside an encrypted pickle. Decoding
//! skips unknown fields, so pickles written by a newer minor version still
//! load.

use crate::account::{Account, AccountConfig, Role, Session, SessionKeys};
use crate::ratchet::{
    Chain, DoubleRatchet, RatchetState, ReceivingChain, SendingChain, SkippedMessageKey,
    SkippedMessageKeys, AD_LEN,
};
use crate::types::{KeyMaterial, X25519PublicKey, X25519Secret};
use crate::x3dh::{IdentityKey, OneTimePreKey, OneTimePreKeyStore};
use crate::Error;
use std::collections::BTreeMap;
use zeroize::{Zeroize, Zeroizing};

#[derive(Clone, PartialEq, prost::Message, Zeroize)]
pub(crate) struct AccountPickle {
    #[prost(bytes = "vec", tag = "1")]
    pub(crate) identity_seed: Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub(crate) one_time_keys: Vec<OneTimeKeyPickle>,
    #[prost(uint32, tag = "3")]
    pub(crate) next_one_time_key_id: u32,
    #[prost(message, optional, tag = "4")]
    pub(crate) config: Option<AccountConfigPickle>,
}

#[derive(Clone, PartialEq, prost::Message, Zeroize)]
pub(crate) struct OneTimeKeyPickle {
    #[prost(uint32, tag = "1")]
    pub(crate) id: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub(crate) secret: Vec<u8>,
    #[prost(bool, tag = "3")]
    pub(crate) published: bool,
    #[prost(bool, tag = "4")]
    pub(crate) used: bool,
}

#[derive(Clone, PartialEq, prost::Message, Zeroize)]
pub(crate) struct AccountConfigPickle {
    #[prost(uint64, tag = "1")]
    pub(crate) max_one_time_keys: u64,
    #[prost(uint32, tag = "2")]
    pub(crate) max_skip: u32,
    #[prost(uint64, tag = "3")]
    pub(crate) max_skipped_message_keys: u64,
    #[prost(bytes = "vec", tag = "4")]
    pub(crate) protocol_info: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message, Zeroize)]
pub(crate) struct SessionPickle {
    #[prost(message, optional, tag = "1")]
    pub(crate) session_keys: Option<SessionKeysPickle>,
    #[prost(bytes = "vec", tag = "2")]
    pub(crate) remote_identity_key: Vec<u8>,
    #[prost(bool, tag = "3")]
    pub(crate) initiator: bool,
    #[prost(bool, tag = "4")]
    pub(crate) received_message: bool,
    #[prost(message, optional, tag = "5")]
    pub(crate) ratchet: Option<RatchetPickle>,
}

#[derive(Clone, PartialEq, prost::Message, Zeroize)]
pub(crate) struct SessionKeysPickle {
    #[prost(bytes = "vec", tag = "1")]
    pub(crate) identity_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub(crate) base_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub(crate) one_time_key: Vec<u8>,
    #[prost(uint32, tag = "4")]
    pub(crate) one_time_key_id: u32,
}

#[derive(Clone, PartialEq, prost::Message, Zeroize)]
pub(crate) struct RatchetPickle {
    #[prost(bytes = "vec", tag = "1")]
    pub(crate) root_key: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub(crate) sending_chain: Option<ChainPickle>,
    #[prost(message, optional, tag = "3")]
    pub(crate) receiving_chain: Option<ChainPickle>,
    #[prost(uint32, tag = "4")]
    pub(crate) previous_counter: u32,
    #[prost(message, repeated, tag = "5")]
    pub(crate) skipped_message_keys: Vec<SkippedKeyPickle>,
    #[prost(uint32, tag = "6")]
    pub(crate) max_skip: u32,
    #[prost(uint64, tag = "7")]
    pub(crate) max_skipped_message_keys: u64,
    #[prost(bytes = "vec", tag = "8")]
    pub(crate) associated_data: Vec<u8>,
}

/// A sending chain stores our secret ratchet key, a receiving chain the
/// peer's public one.
#[derive(Clone, PartialEq, prost::Message, Zeroize)]
pub(crate) struct ChainPickle {
    #[prost(bytes = "vec", tag = "1")]
    pub(crate) ratchet_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub(crate) chain_key: Vec<u8>,
    #[prost(uint32, tag = "3")]
    pub(crate) index: u32,
}

#[derive(Clone, PartialEq, prost::Message, Zeroize)]
pub(crate) struct SkippedKeyPickle {
    #[prost(bytes = "vec", tag = "1")]
    pub(crate) ratchet_key: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub(crate) index: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub(crate) message_key: Vec<u8>,
}

fn corrupted(what: &str) -> Error {
    Error::CorruptedPickle(format!("Invalid {what}"))
}

fn to_usize(value: u64, what: &str) -> Result<usize, Error> {
    usize::try_from(value).map_err(|_| corrupted(what))
}

fn public_key(bytes: &[u8], what: &str) -> Result<X25519PublicKey, Error> {
    X25519PublicKey::from_slice(bytes).map_err(|_| corrupted(what))
}

fn secret_key(bytes: &[u8], what: &str) -> Result<X25519Secret, Error> {
    let mut seed = Zeroizing::new([0u8; 32]);
    if bytes.len() != seed.len() {
        return Err(corrupted(what));
    }
    seed.copy_from_slice(bytes);

    Ok(X25519Secret::from(&*seed))
}

fn key_material(bytes: &[u8], what: &str) -> Result<KeyMaterial, Error> {
    if bytes.len() != 32 {
        return Err(corrupted(what));
    }

    KeyMaterial::from_slice(bytes).ok_or_else(|| corrupted(what))
}

impl Account {
    pub(crate) fn to_proto(&self) -> AccountPickle {
        let one_time_keys = self
            .one_time_keys
            .keys
            .values()
            .map(|key| OneTimeKeyPickle {
                id: key.id,
                secret: key.key.as_bytes().to_vec(),
                published: key.published,
                used: key.used,
            })
            .collect();

        AccountPickle {
            identity_seed: self.identity_key.to_seed().to_vec(),
            one_time_keys,
            next_one_time_key_id: self.one_time_keys.next_id,
            config: Some(AccountConfigPickle {
                max_one_time_keys: self.config.max_one_time_keys as u64,
                max_skip: self.config.max_skip,
                max_skipped_message_keys: self.config.max_skipped_message_keys as u64,
                protocol_info: self.config.protocol_info.clone(),
            }),
        }
    }

    pub(crate) fn from_proto(proto: &AccountPickle) -> Result<Self, Error> {
        let mut seed = Zeroizing::new([0u8; 64]);
        if proto.identity_seed.len() != seed.len() {
            return Err(corrupted("identity key"));
        }
        seed.copy_from_slice(&proto.identity_seed);
        let identity_key = IdentityKey::from_seed(&seed);

        let config_proto = proto
            .config
            .as_ref()
            .ok_or_else(|| Error::CorruptedPickle("Missing account config".to_string()))?;
        let config = AccountConfig {
            max_one_time_keys: to_usize(config_proto.max_one_time_keys, "one-time key limit")?,
            max_skip: config_proto.max_skip,
            max_skipped_message_keys: to_usize(
                config_proto.max_skipped_message_keys,
                "skipped key limit",
            )?,
            protocol_info: config_proto.protocol_info.clone(),
        };

        let mut keys = BTreeMap::new();
        for key in &proto.one_time_keys {
            if key.id == 0 || key.id >= proto.next_one_time_key_id {
                return Err(corrupted("one-time key id"));
            }

            let one_time_key = OneTimePreKey {
                id: key.id,
                key: secret_key(&key.secret, "one-time key")?,
                published: key.published,
                used: key.used,
            };
            if keys.insert(key.id, one_time_key).is_some() {
                return Err(corrupted("one-time key id"));
            }
        }

        let one_time_keys = OneTimePreKeyStore {
            keys,
            next_id: proto.next_one_time_key_id,
            max_keys: config.max_one_time_keys,
        };

        Ok(Self {
            identity_key,
            one_time_keys,
            config,
        })
    }
}

impl Session {
    pub(crate) fn to_proto(&self) -> SessionPickle {
        let keys = &self.session_keys;

        SessionPickle {
            session_keys: Some(SessionKeysPickle {
                identity_key: keys.identity_key.to_bytes().to_vec(),
                base_key: keys.base_key.to_bytes().to_vec(),
                one_time_key: keys.one_time_key.to_bytes().to_vec(),
                one_time_key_id: keys.one_time_key_id,
            }),
            remote_identity_key: self.remote_identity_key.to_bytes().to_vec(),
            initiator: self.role == Role::Initiator,
            received_message: self.received_message,
            ratchet: Some(self.ratchet.to_proto()),
        }
    }

    pub(crate) fn from_proto(proto: &SessionPickle) -> Result<Self, Error> {
        let keys = proto
            .session_keys
            .as_ref()
            .ok_or_else(|| Error::CorruptedPickle("Missing session keys".to_string()))?;
        let session_keys = SessionKeys {
            identity_key: public_key(&keys.identity_key, "identity key")?,
            base_key: public_key(&keys.base_key, "base key")?,
            one_time_key: public_key(&keys.one_time_key, "one-time key")?,
            one_time_key_id: keys.one_time_key_id,
        };

        let ratchet = proto
            .ratchet
            .as_ref()
            .ok_or_else(|| Error::CorruptedPickle("Missing ratchet".to_string()))
            .and_then(DoubleRatchet::from_proto)?;

        let role = if proto.initiator {
            Role::Initiator
        } else {
            Role::Responder
        };

        Ok(Self {
            session_keys,
            remote_identity_key: public_key(&proto.remote_identity_key, "remote identity key")?,
            role,
            received_message: proto.received_message,
            ratchet,
        })
    }
}

impl DoubleRatchet {
    pub(crate) fn to_proto(&self) -> RatchetPickle {
        let state = &self.state;

        RatchetPickle {
            root_key: state.root_key.as_bytes().to_vec(),
            sending_chain: state.sending_chain.as_ref().map(|sending| ChainPickle {
                ratchet_key: sending.ratchet_key.as_bytes().to_vec(),
                chain_key: sending.chain.chain_key.as_bytes().to_vec(),
                index: sending.chain.index,
            }),
            receiving_chain: state.receiving_chain.as_ref().map(|receiving| ChainPickle {
                ratchet_key: receiving.ratchet_key.to_bytes().to_vec(),
                chain_key: receiving.chain.chain_key.as_bytes().to_vec(),
                index: receiving.chain.index,
            }),
            previous_counter: state.previous_counter,
            skipped_message_keys: self
                .skipped_message_keys
                .iter()
                .map(|skipped| SkippedKeyPickle {
                    ratchet_key: skipped.ratchet_key.to_bytes().to_vec(),
                    index: skipped.index,
                    message_key: skipped.message_key.as_bytes().to_vec(),
                })
                .collect(),
            max_skip: self.max_skip,
            max_skipped_message_keys: self.skipped_message_keys.max_keys() as u64,
            associated_data: self.ad.to_vec(),
        }
    }

    pub(crate) fn from_proto(proto: &RatchetPickle) -> Result<Self, Error> {
        let sending_chain = proto
            .sending_chain
            .as_ref()
            .map(|chain| -> Result<SendingChain, Error> {
                Ok(SendingChain {
                    ratchet_key: secret_key(&chain.ratchet_key, "sending ratchet key")?,
                    chain: Chain::with_index(
                        key_material(&chain.chain_key, "sending chain key")?,
                        chain.index,
                    ),
                })
            })
            .transpose()?;

        let receiving_chain = proto
            .receiving_chain
            .as_ref()
            .map(|chain| -> Result<ReceivingChain, Error> {
                Ok(ReceivingChain {
                    ratchet_key: public_key(&chain.ratchet_key, "receiving ratchet key")?,
                    chain: Chain::with_index(
                        key_material(&chain.chain_key, "receiving chain key")?,
                        chain.index,
                    ),
                })
            })
            .transpose()?;

        // Without a sending chain the next one is derived from the peer's key
        if sending_chain.is_none() && receiving_chain.is_none() {
            return Err(Error::CorruptedPickle("Ratchet has no chains".to_string()));
        }

        let mut skipped_message_keys = SkippedMessageKeys::new(to_usize(
            proto.max_skipped_message_keys,
            "skipped key limit",
        )?);
        for skipped in &proto.skipped_message_keys {
            skipped_message_keys.insert(SkippedMessageKey {
                ratchet_key: public_key(&skipped.ratchet_key, "skipped ratchet key")?,
                index: skipped.index,
                message_key: key_material(&skipped.message_key, "skipped message key")?,
            });
        }

        let ad: [u8; AD_LEN] = proto
            .associated_data
            .as_slice()
            .try_into()
            .map_err(|_| corrupted("associated data"))?;

        Ok(Self {
            state: RatchetState {
                root_key: key_material(&proto.root_key, "root key")?,
                sending_chain,
                receiving_chain,
                previous_counter: proto.previous_counter,
            },
            skipped_message_keys,
            max_skip: proto.max_skip,
            ad,
        })
    }
}
