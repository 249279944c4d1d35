use std::fmt::{Debug, Formatter};

use rand::{rngs::OsRng, RngCore};

/// Number of random bytes in a freshly minted session identity.
pub const SESSION_KEY_LEN: usize = 64;

/// Opaque session identity. The bytes are never parsed and never printed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(Vec<u8>);

impl SessionKey {
    pub fn generate() -> Self {
        let mut value = vec![0u8; SESSION_KEY_LEN];
        OsRng.fill_bytes(&mut value);
        Self(value)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Debug for SessionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKey(<{} bytes>)", self.0.len())
    }
}

impl AsRef<[u8]> for SessionKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for SessionKey {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl Default for SessionKey {
    fn default() -> Self {
        Self::generate()
    }
}
