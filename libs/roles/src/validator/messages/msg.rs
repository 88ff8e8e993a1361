//! Generic message plumbing: hashing, signing, variant casting.
use std::fmt;

use crate::{
    hash::Encoder,
    validator::{
        BlockNumber, InvalidSignatureError, Proposal, PublicKey, RoundNumber, Signature, Vote,
    },
};

/// Every message a validator can sign.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ConsensusMsg {
    /// A block proposal for a round.
    Proposal(Proposal),
    /// A prevote or precommit.
    Vote(Vote),
}

impl ConsensusMsg {
    /// Label of the message variant, for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Proposal(_) => "Proposal",
            Self::Vote(vote) => match vote.kind {
                crate::validator::VoteKind::Prevote => "Prevote",
                crate::validator::VoteKind::Precommit => "Precommit",
            },
        }
    }

    /// Height the message applies to.
    pub fn number(&self) -> BlockNumber {
        match self {
            Self::Proposal(proposal) => proposal.number(),
            Self::Vote(vote) => vote.number,
        }
    }

    /// Round the message applies to.
    pub fn round(&self) -> RoundNumber {
        match self {
            Self::Proposal(proposal) => proposal.round,
            Self::Vote(vote) => vote.round,
        }
    }

    /// Canonical digest of the message. This is what gets signed.
    pub fn hash(&self) -> MsgHash {
        let mut enc = Encoder::default();
        match self {
            Self::Proposal(proposal) => {
                enc.tag(0);
                proposal.encode(&mut enc);
            }
            Self::Vote(vote) => {
                enc.tag(1);
                vote.encode(&mut enc);
            }
        }
        MsgHash(enc.finish())
    }
}

/// Digest of a [`ConsensusMsg`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsgHash(pub(crate) [u8; 32]);

impl MsgHash {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for MsgHash {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "msg:{}", &hex::encode(self.0)[..12])
    }
}

/// Error returned when casting a message to the wrong variant.
#[derive(Debug, thiserror::Error)]
#[error("bad variant")]
pub struct BadVariantError;

/// Sub-variant relationship between a concrete message type and an enclosing
/// message enum. Lets [`Signed`] stay strongly typed while signatures cover
/// the full enum encoding.
pub trait Variant<M>: Sized {
    /// Wraps the message into the enum.
    fn insert(self) -> M;
    /// Extracts the message from the enum.
    fn extract(msg: M) -> Result<Self, BadVariantError>;
}

impl Variant<ConsensusMsg> for ConsensusMsg {
    fn insert(self) -> ConsensusMsg {
        self
    }
    fn extract(msg: ConsensusMsg) -> Result<Self, BadVariantError> {
        Ok(msg)
    }
}

impl Variant<ConsensusMsg> for Proposal {
    fn insert(self) -> ConsensusMsg {
        ConsensusMsg::Proposal(self)
    }
    fn extract(msg: ConsensusMsg) -> Result<Self, BadVariantError> {
        let ConsensusMsg::Proposal(this) = msg else {
            return Err(BadVariantError);
        };
        Ok(this)
    }
}

impl Variant<ConsensusMsg> for Vote {
    fn insert(self) -> ConsensusMsg {
        ConsensusMsg::Vote(self)
    }
    fn extract(msg: ConsensusMsg) -> Result<Self, BadVariantError> {
        let ConsensusMsg::Vote(this) = msg else {
            return Err(BadVariantError);
        };
        Ok(this)
    }
}

/// Strongly typed signed message.
/// WARNING: the signature is not guaranteed to be valid until
/// [`Signed::verify`] succeeds.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Signed<V: Variant<ConsensusMsg>> {
    /// The message that was signed.
    pub msg: V,
    /// The public key of the signer.
    pub key: PublicKey,
    /// The signature.
    pub sig: Signature,
}

impl<V: Variant<ConsensusMsg> + Clone> Signed<V> {
    /// Verifies the signature on the message.
    pub fn verify(&self) -> Result<(), InvalidSignatureError> {
        self.sig
            .verify_raw(self.msg.clone().insert().hash().as_bytes(), &self.key)
    }
}

impl<V: Variant<ConsensusMsg>> Signed<V> {
    /// Casts a signed message to a sub/super variant, keeping the signature.
    pub fn cast<U: Variant<ConsensusMsg>>(self) -> Result<Signed<U>, BadVariantError> {
        Ok(Signed {
            msg: U::extract(self.msg.insert())?,
            key: self.key,
            sig: self.sig,
        })
    }
}
