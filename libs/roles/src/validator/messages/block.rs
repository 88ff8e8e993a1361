//! Blocks and their identifiers.
use std::fmt;

use crate::{
    hash::Encoder,
    validator::{PublicKey, RoundNumber, Transaction},
};

/// Position of a block in the chain. Height 0 is the genesis block.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct BlockNumber(pub u64);

impl BlockNumber {
    /// The next block number.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The previous block number, if any.
    pub fn prev(self) -> Option<Self> {
        Some(Self(self.0.checked_sub(1)?))
    }

    /// Whether this is the genesis height.
    pub fn is_genesis(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(fmt)
    }
}

/// Identifier of a block: the Keccak-256 digest of its header encoding.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) [u8; 32]);

impl BlockId {
    /// The all-zero id, used as the `previous` reference of the genesis block.
    pub fn zero() -> Self {
        Self([0; 32])
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "block:{}", &hex::encode(self.0)[..12])
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&hex::encode(self.0))
    }
}

impl serde::Serialize for BlockId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> serde::Deserialize<'de> for BlockId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = <String as serde::Deserialize>::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        Ok(Self(
            bytes
                .as_slice()
                .try_into()
                .map_err(serde::de::Error::custom)?,
        ))
    }
}

/// Digest committing the header to the block's transaction list.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadHash(pub(crate) [u8; 32]);

impl PayloadHash {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for PayloadHash {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "payload:{}", &hex::encode(self.0)[..12])
    }
}

impl serde::Serialize for PayloadHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> serde::Deserialize<'de> for PayloadHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = <String as serde::Deserialize>::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        Ok(Self(
            bytes
                .as_slice()
                .try_into()
                .map_err(serde::de::Error::custom)?,
        ))
    }
}

/// A block header. The id of a block is the digest of this struct, so every
/// field change invalidates preexisting references and signatures.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockHeader {
    /// Height of the block.
    pub number: BlockNumber,
    /// Consensus round the block was produced in.
    pub round: RoundNumber,
    /// Id of the parent block; the zero id at height 0.
    pub previous: BlockId,
    /// Unix timestamp in milliseconds claimed by the generator.
    pub timestamp: u64,
    /// Public key of the validator that produced the block.
    pub generator: PublicKey,
    /// Digest of the transaction list.
    pub payload_hash: PayloadHash,
    /// Number of transactions in the block.
    pub tx_count: u32,
}

impl BlockHeader {
    /// Computes the block id.
    pub fn id(&self) -> BlockId {
        let mut enc = Encoder::default();
        enc.u64(self.number.0)
            .u64(self.round.0)
            .bytes(self.previous.as_bytes())
            .u64(self.timestamp)
            .bytes(&self.generator.to_bytes())
            .bytes(self.payload_hash.as_bytes())
            .u64(u64::from(self.tx_count));
        BlockId(enc.finish())
    }
}

/// A candidate or committed block.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    /// Header, committing to everything below.
    pub header: BlockHeader,
    /// Transactions, in execution order.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Id of the block.
    pub fn id(&self) -> BlockId {
        self.header.id()
    }

    /// Height of the block.
    pub fn number(&self) -> BlockNumber {
        self.header.number
    }

    /// Computes the payload digest over a transaction list.
    pub fn payload_hash(transactions: &[Transaction]) -> PayloadHash {
        let mut enc = Encoder::default();
        for tx in transactions {
            enc.bytes(tx.id().as_bytes());
        }
        PayloadHash(enc.finish())
    }

    /// Verifies internal consistency of the block.
    pub fn verify(&self) -> Result<(), BlockValidationError> {
        if self.header.tx_count as usize != self.transactions.len() {
            return Err(BlockValidationError::TxCountMismatch {
                header: self.header.tx_count,
                actual: self.transactions.len(),
            });
        }
        let payload_hash = Self::payload_hash(&self.transactions);
        if payload_hash != self.header.payload_hash {
            return Err(BlockValidationError::PayloadHashMismatch);
        }
        Ok(())
    }
}

/// Errors detected by [`Block::verify`].
#[derive(Debug, thiserror::Error)]
pub enum BlockValidationError {
    /// Header transaction count disagrees with the payload.
    #[error("header declares {header} transactions, block carries {actual}")]
    TxCountMismatch {
        /// Count from the header.
        header: u32,
        /// Count of transactions actually present.
        actual: usize,
    },
    /// Header payload digest disagrees with the payload.
    #[error("header payload hash doesn't match the transaction list")]
    PayloadHashMismatch,
}
