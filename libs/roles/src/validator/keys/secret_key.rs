use std::fmt;

use anyhow::Context as _;
use ed25519_dalek as ed;
use ed25519_dalek::Signer as _;
use zeroize::Zeroize as _;

use super::{PublicKey, Signature};
use crate::validator::{ConsensusMsg, Signed, Variant};

/// A secret key for the consensus role. Signs proposals and votes on behalf of
/// a registered validator. `SecretKey` is secret material: it never leaves the
/// node, is excluded from all serialized forms, and its textual encodings are
/// redacted in logs.
pub struct SecretKey(ed::SigningKey);

impl SecretKey {
    /// Generates a secret key from a cryptographically-secure entropy source.
    pub fn generate() -> Self {
        Self(ed::SigningKey::generate(&mut rand::rngs::OsRng {}))
    }

    /// Generates a secret key from the provided rng. Deterministic fixtures in
    /// tests use this with a seeded rng.
    pub fn generate_from(rng: &mut (impl rand::RngCore + rand::CryptoRng)) -> Self {
        Self(ed::SigningKey::generate(rng))
    }

    /// Reconstructs a secret key from raw key material, consuming it.
    pub fn from_bytes(mut bytes: [u8; 32]) -> Self {
        let key = ed::SigningKey::from_bytes(&bytes);
        bytes.zeroize();
        Self(key)
    }

    /// The public half of this key pair.
    pub fn public(&self) -> PublicKey {
        PublicKey::new(self.0.verifying_key())
    }

    /// Signs a raw digest.
    pub(crate) fn sign_raw(&self, digest: &[u8]) -> Signature {
        Signature::new(self.0.sign(digest))
    }

    /// Signs a consensus message, producing a [`Signed`] wrapper that carries
    /// the message together with this key's identity and signature.
    pub fn sign_msg<V: Variant<ConsensusMsg> + Clone>(&self, msg: V) -> Signed<V> {
        let sig = self.sign_raw(msg.clone().insert().hash().as_bytes());
        Signed {
            msg,
            key: self.public(),
            sig,
        }
    }

    /// Decodes a secret key from its `validator:secret:ed25519:` text form.
    pub fn decode(text: &str) -> anyhow::Result<Self> {
        let hex_str = text
            .strip_prefix("validator:secret:ed25519:")
            .context("bad prefix")?;
        let mut bytes: [u8; 32] = hex::decode(hex_str)
            .context("invalid hex")?
            .as_slice()
            .try_into()
            .context("invalid key length")?;
        let this = Self::from_bytes(bytes);
        bytes.zeroize();
        Ok(this)
    }
}

impl Clone for SecretKey {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        self.public() == other.public()
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "<secret key for {:?}>", self.public())
    }
}
