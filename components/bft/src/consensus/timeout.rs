//! Round timeout handling.
//!
//! Timers are disarmed on every round change, so a firing timer always refers
//! to the current `(height, round)`. A timeout cancels waiting for further
//! messages in its stage; it never cancels an in-flight persistence write,
//! because writes complete before the event loop takes the next event.

use corten_consensus_roles::validator;

use super::{ProcessError, StateMachine, Timeout};

impl StateMachine {
    /// Handles an expired round timer.
    pub(crate) async fn on_timeout(&mut self, timeout: Timeout) -> Result<(), ProcessError> {
        match timeout {
            Timeout::Propose => self.on_timeout_propose().await,
            Timeout::Prevote => self.on_timeout_prevote().await,
            Timeout::Precommit => self.on_timeout_precommit().await,
        }
    }

    /// No proposal arrived in time: prevote nil.
    async fn on_timeout_propose(&mut self) -> Result<(), ProcessError> {
        if self.step != validator::Step::Propose {
            return Ok(());
        }
        tracing::info!("timeout to propose {}/{} expired", self.number, self.round);
        self.step = validator::Step::Prevote;
        self.save_state().await?;
        self.cast_votes(validator::VoteKind::Prevote, None).await?;
        Ok(())
    }

    /// Prevotes never converged: precommit nil.
    async fn on_timeout_prevote(&mut self) -> Result<(), ProcessError> {
        if self.step != validator::Step::Prevote {
            return Ok(());
        }
        tracing::info!("timeout to prevote {}/{} expired", self.number, self.round);
        self.log_round_votes(validator::VoteKind::Prevote);
        self.step = validator::Step::Precommit;
        self.save_state().await?;
        self.cast_votes(validator::VoteKind::Precommit, None).await?;
        Ok(())
    }

    /// Precommits never converged: move to the next round, carrying any lock.
    async fn on_timeout_precommit(&mut self) -> Result<(), ProcessError> {
        tracing::info!(
            "timeout to precommit {}/{} expired",
            self.number,
            self.round,
        );
        self.log_round_votes(validator::VoteKind::Prevote);
        self.log_round_votes(validator::VoteKind::Precommit);
        self.start_round(self.round.next()).await
    }

    fn log_round_votes(&self, kind: validator::VoteKind) {
        if let Some(slot) = self.round_states.get(&self.round) {
            tracing::debug!(
                "{}s for {}/{}: {} of {} validators ({} weight)",
                kind.as_str(),
                self.number,
                self.round,
                slot.vote_count(kind),
                self.committee.len(),
                slot.total_weight(kind, &self.committee),
            );
        }
    }
}
