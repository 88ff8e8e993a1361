//! The weighted validator committee.
use std::collections::BTreeMap;

use anyhow::Context as _;

use crate::validator::PublicKey;

/// Voting weight.
pub type Weight = u64;

/// A set of validators active at some height. Each validator is represented by
/// its consensus public key; ordering is canonical (by key), so every node
/// derives the same indices from the same membership.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committee {
    vec: Vec<WeightedValidator>,
    indexes: BTreeMap<PublicKey, usize>,
    total_weight: Weight,
}

/// Validator representation inside a [`Committee`].
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WeightedValidator {
    /// Consensus key of the validator.
    pub key: PublicKey,
    /// Voting weight of the validator.
    pub weight: Weight,
}

impl Committee {
    /// Creates a new committee. The order of the given validators is NOT
    /// preserved; members are sorted by key.
    pub fn new(validators: impl IntoIterator<Item = WeightedValidator>) -> anyhow::Result<Self> {
        let mut map = BTreeMap::new();
        let mut total_weight: Weight = 0;
        for v in validators {
            anyhow::ensure!(
                !map.contains_key(&v.key),
                "duplicate validator in committee"
            );
            anyhow::ensure!(v.weight > 0, "validator weight has to be positive");
            total_weight = total_weight
                .checked_add(v.weight)
                .context("sum of weights overflows")?;
            map.insert(v.key.clone(), v);
        }
        anyhow::ensure!(!map.is_empty(), "committee must have at least one validator");
        let vec: Vec<_> = map.into_values().collect();
        Ok(Self {
            indexes: vec
                .iter()
                .enumerate()
                .map(|(i, v)| (v.key.clone(), i))
                .collect(),
            vec,
            total_weight,
        })
    }

    /// Iterates over validators in index order.
    pub fn iter(&self) -> impl Iterator<Item = &WeightedValidator> {
        self.vec.iter()
    }

    /// Iterates over validator keys in index order.
    pub fn keys(&self) -> impl Iterator<Item = &PublicKey> {
        self.vec.iter().map(|v| &v.key)
    }

    /// Number of validators.
    pub fn len(&self) -> usize {
        self.vec.len()
    }

    /// Whether the given key belongs to the committee.
    pub fn contains(&self, validator: &PublicKey) -> bool {
        self.indexes.contains_key(validator)
    }

    /// Validator by committee index.
    pub fn get(&self, index: usize) -> Option<&WeightedValidator> {
        self.vec.get(index)
    }

    /// Committee index of a validator.
    pub fn index(&self, validator: &PublicKey) -> Option<usize> {
        self.indexes.get(validator).copied()
    }

    /// Sum of all weights.
    pub fn total_weight(&self) -> Weight {
        self.total_weight
    }

    /// Minimal cumulative weight that constitutes a quorum.
    pub fn quorum_threshold(&self) -> Weight {
        quorum_threshold(self.total_weight)
    }

    /// Minimal cumulative weight that rules out an all-honest minority.
    pub fn minority_threshold(&self) -> Weight {
        minority_threshold(self.total_weight)
    }
}

/// Minimal weight strictly greater than 2/3 of the total: the quorum needed to
/// lock or commit a value.
pub fn quorum_threshold(total_weight: Weight) -> Weight {
    (u128::from(total_weight) * 2 / 3 + 1) as Weight
}

/// Minimal weight strictly greater than 1/3 of the total: enough that at least
/// one honest validator is represented.
pub fn minority_threshold(total_weight: Weight) -> Weight {
    (u128::from(total_weight) / 3 + 1) as Weight
}
