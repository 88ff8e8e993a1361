//! Resolution of the active validator committee.

use std::sync::{Arc, Mutex};

use corten_consensus_engine::EngineManager;
use corten_consensus_roles::validator;

/// Errors surfaced while resolving the active validator set.
#[derive(Debug, thiserror::Error)]
pub enum ValidatorSetError {
    /// A locally configured key has no on-chain registration.
    #[error("configured key {key:?} has no on-chain validator registration")]
    UnknownValidator {
        /// The unregistered key.
        key: Box<validator::PublicKey>,
    },
    /// The snapshot has fewer registrations than the milestone requires.
    #[error("not enough registered validators: got {got}, want {want}")]
    NotEnoughValidators {
        /// Number of registered validators.
        got: usize,
        /// Required committee size.
        want: usize,
    },
    /// The snapshot cannot form a committee.
    #[error("invalid committee: {0:#}")]
    InvalidCommittee(#[source] anyhow::Error),
    /// The underlying chain read failed.
    #[error("engine: {0:#}")]
    Engine(#[source] anyhow::Error),
}

/// Resolves the committee of active validators for a height from the chain's
/// registration snapshot. Read-only with respect to chain state.
///
/// The registration snapshot is ranked by the wallet/state layer; the service
/// caps it to the milestone's committee size. Snapshots rotate only at epoch
/// boundaries, so within an epoch the cached committee is returned.
#[derive(Debug)]
pub struct ValidatorSetService {
    engine: Arc<EngineManager>,
    milestones: validator::MilestoneSchedule,
    cache: Mutex<Option<(u64, validator::Committee)>>,
}

impl ValidatorSetService {
    /// Creates a new service.
    pub fn new(engine: Arc<EngineManager>, milestones: validator::MilestoneSchedule) -> Self {
        Self {
            engine,
            milestones,
            cache: Mutex::new(None),
        }
    }

    /// The committee of active validators for the given height.
    pub async fn active_validators(
        &self,
        number: validator::BlockNumber,
    ) -> Result<validator::Committee, ValidatorSetError> {
        let milestone = self.milestones.milestone(number);
        let epoch = number.0 / milestone.epoch_length;
        if let Some((cached_epoch, committee)) = &*self.cache.lock().unwrap() {
            if *cached_epoch == epoch {
                return Ok(committee.clone());
            }
        }

        let registrations = self
            .engine
            .validator_registrations(number)
            .await
            .map_err(ValidatorSetError::Engine)?;
        if registrations.len() < milestone.active_validators {
            return Err(ValidatorSetError::NotEnoughValidators {
                got: registrations.len(),
                want: milestone.active_validators,
            });
        }
        let committee = validator::Committee::new(
            registrations
                .into_iter()
                .take(milestone.active_validators),
        )
        .map_err(ValidatorSetError::InvalidCommittee)?;

        tracing::info!(
            epoch,
            size = committee.len(),
            total_weight = committee.total_weight(),
            "resolved active validator committee"
        );
        *self.cache.lock().unwrap() = Some((epoch, committee.clone()));
        Ok(committee)
    }

    /// Checks that every locally configured key has an on-chain registration
    /// for the given height.
    pub async fn verify_local_keys(
        &self,
        number: validator::BlockNumber,
        keys: &[validator::SecretKey],
    ) -> Result<(), ValidatorSetError> {
        let registrations = self
            .engine
            .validator_registrations(number)
            .await
            .map_err(ValidatorSetError::Engine)?;
        for key in keys {
            let public = key.public();
            if !registrations.iter().any(|v| v.key == public) {
                return Err(ValidatorSetError::UnknownValidator {
                    key: Box::new(public),
                });
            }
        }
        Ok(())
    }
}
