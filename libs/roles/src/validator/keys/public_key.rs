use std::{fmt, str::FromStr};

use anyhow::Context as _;
use ed25519_dalek as ed;

/// A public key for the consensus role. This is the on-chain identity of a
/// validator; committee membership, proposer selection and vote attribution
/// all key off this value.
#[derive(Clone)]
pub struct PublicKey(ed::VerifyingKey);

impl PublicKey {
    pub(crate) fn new(key: ed::VerifyingKey) -> Self {
        Self(key)
    }

    pub(crate) fn as_inner(&self) -> &ed::VerifyingKey {
        &self.0
    }

    /// Raw key material.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Reconstructs a public key from raw key material.
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let bytes: &[u8; ed::PUBLIC_KEY_LENGTH] =
            bytes.try_into().context("invalid key length")?;
        ed::VerifyingKey::from_bytes(bytes)
            .context("invalid key material")
            .map(Self)
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes() == other.0.as_bytes()
    }
}

impl Eq for PublicKey {}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write(self.0.as_bytes());
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "validator:public:ed25519:{}",
            hex::encode(self.0.as_bytes())
        )
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The 8-char prefix is enough to tell validators apart in logs.
        write!(fmt, "validator:{}", &hex::encode(self.0.as_bytes())[..8])
    }
}

impl FromStr for PublicKey {
    type Err = anyhow::Error;

    fn from_str(text: &str) -> anyhow::Result<Self> {
        let hex_str = text
            .strip_prefix("validator:public:ed25519:")
            .context("bad prefix")?;
        Self::from_bytes(&hex::decode(hex_str).context("invalid hex")?)
    }
}

impl serde::Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = <String as serde::Deserialize>::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
