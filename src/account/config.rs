/// Tunables of an [`crate::Account`] and of the sessions it creates.
///
/// The config is stored in account pickles, so a restored account keeps the
/// limits it was created with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountConfig {
    /// Capacity of the one-time key pool.
    pub max_one_time_keys: usize,
    /// Largest counter gap a single incoming message may skip over.
    pub max_skip: u32,
    /// Skipped message keys a session keeps; the oldest are dropped beyond it.
    pub max_skipped_message_keys: usize,
    /// Context for the initial key agreement. Both peers must agree on it.
    pub protocol_info: Vec<u8>,
}

impl AccountConfig {
    pub(crate) fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_skip: self.max_skip,
            max_skipped_message_keys: self.max_skipped_message_keys,
        }
    }
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            max_one_time_keys: 100,
            max_skip: 2000,
            max_skipped_message_keys: 2000,
            protocol_info: b"Parley-E2E-v1".to_vec(),
        }
    }
}

/// The ratchet limits a session inherits from its account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub max_skip: u32,
    pub max_skipped_message_keys: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        AccountConfig::default().session_config()
    }
}
