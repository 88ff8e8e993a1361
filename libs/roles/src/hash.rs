//! Keccak-256, the only hash the consensus types use.

use sha3::{Digest as _, Keccak256};

/// Hashes a byte string with Keccak-256.
pub(crate) fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Canonical encoding buffer for signed/hashed messages. Fields are appended
/// length-prefixed so that no two distinct messages share an encoding.
#[derive(Default)]
pub(crate) struct Encoder(Vec<u8>);

impl Encoder {
    /// Appends a fixed-width integer.
    pub(crate) fn u64(&mut self, value: u64) -> &mut Self {
        self.0.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Appends a single tag byte.
    pub(crate) fn tag(&mut self, value: u8) -> &mut Self {
        self.0.push(value);
        self
    }

    /// Appends a length-prefixed byte string.
    pub(crate) fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.u64(value.len() as u64);
        self.0.extend_from_slice(value);
        self
    }

    /// Appends an optional 32-byte digest, tagging absence.
    pub(crate) fn opt_digest(&mut self, value: Option<&[u8; 32]>) -> &mut Self {
        match value {
            Some(digest) => self.tag(1).bytes(digest),
            None => self.tag(0),
        }
    }

    /// Consumes the buffer and hashes it.
    pub(crate) fn finish(&self) -> [u8; 32] {
        keccak256(&self.0)
    }
}
