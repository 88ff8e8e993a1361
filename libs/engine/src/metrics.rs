use std::time;

#[vise::register]
pub(super) static ENGINE: vise::Global<Engine> = vise::Global::new();

#[derive(Debug, vise::Metrics)]
#[metrics(prefix = "corten_consensus_engine")]
pub(super) struct Engine {
    /// Latency of a successful consensus-storage write.
    #[metrics(unit = vise::Unit::Seconds, buckets = vise::Buckets::LATENCIES)]
    pub(super) storage_write_latency: vise::Histogram<time::Duration>,
    /// Latency of a successful `apply_block()` call.
    #[metrics(unit = vise::Unit::Seconds, buckets = vise::Buckets::LATENCIES)]
    pub(super) apply_block_latency: vise::Histogram<time::Duration>,
    /// Latency of a successful `candidate_transactions()` call.
    #[metrics(unit = vise::Unit::Seconds, buckets = vise::Buckets::LATENCIES)]
    pub(super) collation_latency: vise::Histogram<time::Duration>,
}
