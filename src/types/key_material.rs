use zeroize::{Zeroize, ZeroizeOnDrop};

/// 32 bytes of secret symmetric key material: root, chain and message keys.
///
/// The bytes live on the heap so moves do not leave copies on the stack, and
/// are wiped when the value is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct KeyMaterial(Box<[u8; 32]>);

impl KeyMaterial {
    /// Copies the first 32 bytes of `bytes`, or returns `None` if fewer are given.
    pub(crate) fn from_slice(bytes: &[u8]) -> Option<Self> {
        let mut key = Box::new([0u8; 32]);
        key.copy_from_slice(bytes.get(..32)?);
        Some(Self(key))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8; 32] {
        &mut self.0
    }
}

impl Default for KeyMaterial {
    fn default() -> Self {
        Self(Box::new([0u8; 32]))
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.0[..].ct_eq(&other.0[..]).into()
    }
}

impl Eq for KeyMaterial {}
