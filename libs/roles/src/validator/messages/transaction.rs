//! Transactions as consensus sees them. Execution semantics live behind the
//! engine contract; consensus only needs identity, versioning and nonce order.
use std::fmt;

use crate::{hash::Encoder, validator::PublicKey};

/// Identifier of a transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxId(pub(crate) [u8; 32]);

impl TxId {
    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "tx:{}", &hex::encode(self.0)[..12])
    }
}

/// A transaction embedded in a block.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    /// Serialization version. All transactions in a block must agree on it.
    pub version: u8,
    /// Public key of the sending account.
    pub sender: PublicKey,
    /// Sender-scoped sequence number; consecutive within a block and
    /// continuous with the sender's last applied nonce.
    pub nonce: u64,
    /// Opaque payload handed to the execution engine.
    #[serde(with = "hex_payload")]
    pub payload: Vec<u8>,
}

impl Transaction {
    /// Computes the transaction id.
    pub fn id(&self) -> TxId {
        let mut enc = Encoder::default();
        enc.tag(self.version)
            .bytes(&self.sender.to_bytes())
            .u64(self.nonce)
            .bytes(&self.payload);
        TxId(enc.finish())
    }
}

mod hex_payload {
    pub(super) fn serialize<S: serde::Serializer>(
        payload: &[u8],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(payload))
    }

    pub(super) fn deserialize<'de, D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let text = <String as serde::Deserialize>::deserialize(deserializer)?;
        hex::decode(&text).map_err(serde::de::Error::custom)
    }
}
