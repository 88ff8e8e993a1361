//! Metrics for the consensus component.

use std::time::Duration;

use vise::{Buckets, Counter, EncodeLabelSet, EncodeLabelValue, Family, Gauge, Histogram, Metrics,
    Unit};

/// Label for a consensus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
pub(crate) enum ConsensusMsgLabel {
    /// Label for a `Proposal` message.
    Proposal,
    /// Label for a `Prevote` message.
    Prevote,
    /// Label for a `Precommit` message.
    Precommit,
}

impl ConsensusMsgLabel {
    /// Attaches a result to this label.
    pub(crate) fn with_result<E>(self, result: &Result<(), E>) -> ProcessingLatencyLabels {
        ProcessingLatencyLabels {
            r#type: self,
            result: match result {
                Ok(()) => ResultLabel::Ok,
                Err(_) => ResultLabel::Err,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
enum ResultLabel {
    Ok,
    Err,
}

/// Labels for processing latency metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelSet)]
pub(crate) struct ProcessingLatencyLabels {
    r#type: ConsensusMsgLabel,
    result: ResultLabel,
}

/// Labels for block processor verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelSet)]
pub(crate) struct VerdictLabels {
    /// The verdict the pipeline produced.
    pub(crate) verdict: VerdictLabel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
pub(crate) enum VerdictLabel {
    Accepted,
    Discarded,
    Rejected,
    Rollback,
    Corrupted,
}

/// Metrics defined by the consensus component.
#[derive(Debug, Metrics)]
#[metrics(prefix = "corten_consensus")]
pub(crate) struct ConsensusMetrics {
    /// Height the state machine is currently deciding.
    pub(crate) height: Gauge<u64>,
    /// Round of the current height.
    pub(crate) round: Gauge<u64>,
    /// Latency of a round, from start to commit or round bump.
    #[metrics(buckets = Buckets::exponential(0.125..=64.0, 2.0), unit = Unit::Seconds)]
    pub(crate) round_latency: Histogram<Duration>,
    /// Latency from round start until the block is committed.
    #[metrics(buckets = Buckets::exponential(0.125..=64.0, 2.0), unit = Unit::Seconds)]
    pub(crate) commit_latency: Histogram<Duration>,
    /// Latency of processing messages by the state machine.
    #[metrics(buckets = Buckets::LATENCIES, unit = Unit::Seconds)]
    pub(crate) message_processing_latency: Family<ProcessingLatencyLabels, Histogram<Duration>>,
    /// Block processor verdicts.
    pub(crate) processor_verdicts: Family<VerdictLabels, Counter>,
}

/// Global instance of [`ConsensusMetrics`].
#[vise::register]
pub(crate) static METRICS: vise::Global<ConsensusMetrics> = vise::Global::new();
