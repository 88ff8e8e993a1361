//! Round timeout scheduling.
//!
//! The state machine arms at most one timer per stage: the propose timer at
//! round start, the prevote timer once prevotes from a quorum of validators
//! (for any target) are in, and the precommit timer analogously. Arming is
//! idempotent within a round; a round change disarms everything.

use tokio::time::{Duration, Instant};

/// The three timeout kinds of a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Timeout {
    /// No proposal arrived in time.
    Propose,
    /// Prevotes reached quorum weight without agreeing on a target.
    Prevote,
    /// Precommits reached quorum weight without agreeing on a target.
    Precommit,
}

/// Deadline slots for the current round.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    propose: Option<Instant>,
    prevote: Option<Instant>,
    precommit: Option<Instant>,
}

impl Scheduler {
    fn slot(&mut self, timeout: Timeout) -> &mut Option<Instant> {
        match timeout {
            Timeout::Propose => &mut self.propose,
            Timeout::Prevote => &mut self.prevote,
            Timeout::Precommit => &mut self.precommit,
        }
    }

    /// Disarms every timer. Called on every round change.
    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }

    /// Arms a timer `delay` from now. Returns false if it was already armed.
    pub(crate) fn schedule(&mut self, timeout: Timeout, delay: Duration) -> bool {
        let slot = self.slot(timeout);
        if slot.is_some() {
            return false;
        }
        *slot = Some(Instant::now() + delay);
        true
    }

    /// Disarms a single timer, typically right before handling its expiry.
    pub(crate) fn disarm(&mut self, timeout: Timeout) {
        *self.slot(timeout) = None;
    }

    /// The earliest armed deadline, if any.
    pub(crate) fn next(&self) -> Option<(Instant, Timeout)> {
        [
            (self.propose, Timeout::Propose),
            (self.prevote, Timeout::Prevote),
            (self.precommit, Timeout::Precommit),
        ]
        .into_iter()
        .filter_map(|(deadline, timeout)| Some((deadline?, timeout)))
        .min_by_key(|(deadline, _)| *deadline)
    }
}
