use std::fmt;

use super::{InvalidSignatureError, PublicKey, Signature};
use crate::validator::{ConsensusMsg, MsgHash, Variant};

/// An aggregate of individual validator signatures over the same message,
/// ordered by the signers' committee indices. Quorum certificates carry one of
/// these next to the bitmap that says which validator produced which
/// component.
///
/// Verification is pairwise; the aggregate is a container, not a cryptographic
/// accumulator. The signature scheme is an opaque collaborator, so nothing
/// here assumes aggregation support from it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AggregateSignature(pub(crate) Vec<Signature>);

impl AggregateSignature {
    /// Number of component signatures.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no signatures have been aggregated yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Verifies the aggregate over `(message, key)` pairs, which must come in
    /// the same committee order the components were inserted in.
    pub fn verify_messages<'a, V: Variant<ConsensusMsg> + Clone>(
        &self,
        messages_and_keys: impl Iterator<Item = (V, &'a PublicKey)>,
    ) -> Result<(), InvalidSignatureError> {
        let hashes_and_keys =
            messages_and_keys.map(|(msg, key)| (msg.insert().hash(), key));
        self.verify_hashes(hashes_and_keys)
    }

    /// Verifies the aggregate over precomputed message hashes.
    pub fn verify_hashes<'a>(
        &self,
        hashes_and_keys: impl Iterator<Item = (MsgHash, &'a PublicKey)>,
    ) -> Result<(), InvalidSignatureError> {
        let mut checked = 0;
        for (hash, key) in hashes_and_keys {
            let Some(sig) = self.0.get(checked) else {
                return Err(InvalidSignatureError);
            };
            sig.verify_raw(hash.as_bytes(), key)?;
            checked += 1;
        }
        // Every component must be accounted for.
        if checked != self.0.len() {
            return Err(InvalidSignatureError);
        }
        Ok(())
    }
}

impl fmt::Debug for AggregateSignature {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "agg_sig[{}]", self.0.len())
    }
}

impl serde::Serialize for AggregateSignature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&self.0, serializer)
    }
}

impl<'de> serde::Deserialize<'de> for AggregateSignature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(<Vec<Signature> as serde::Deserialize>::deserialize(
            deserializer,
        )?))
    }
}
