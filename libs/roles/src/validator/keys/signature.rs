use std::fmt;

use anyhow::Context as _;
use ed25519_dalek as ed;
use ed25519_dalek::Verifier as _;

use super::PublicKey;

/// A signature over a consensus message digest.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(ed::Signature);

/// Error returned when a signature fails verification.
#[derive(Debug, thiserror::Error)]
#[error("invalid signature")]
pub struct InvalidSignatureError;

impl Signature {
    pub(crate) fn new(sig: ed::Signature) -> Self {
        Self(sig)
    }

    /// Raw signature material.
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }

    /// Reconstructs a signature from raw material.
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let bytes: &[u8; ed::SIGNATURE_LENGTH] =
            bytes.try_into().context("invalid signature length")?;
        Ok(Self(ed::Signature::from_bytes(bytes)))
    }

    /// Verifies this signature over a raw digest against a public key.
    pub fn verify_raw(
        &self,
        digest: &[u8],
        key: &PublicKey,
    ) -> Result<(), InvalidSignatureError> {
        key.as_inner()
            .verify(digest, &self.0)
            .map_err(|_| InvalidSignatureError)
    }
}

impl std::hash::Hash for Signature {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(&self.to_bytes());
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "validator:signature:ed25519:{}",
            hex::encode(self.to_bytes())
        )
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "sig:{}", &hex::encode(self.to_bytes())[..8])
    }
}

impl serde::Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'de> serde::Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = <String as serde::Deserialize>::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}
