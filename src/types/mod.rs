mod ed25519;
mod key_material;
mod x25519;

pub use ed25519::{Ed25519PublicKey, Ed25519Signature};
pub(crate) use key_material::KeyMaterial;
pub use x25519::X25519PublicKey;
pub(crate) use x25519::X25519Secret;
