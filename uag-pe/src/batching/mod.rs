//! Batch sizing for calls to the external scoring service
//!
//! Chunk size balances four competing constraints: how hard the scoring
//! service may be driven, how much latency one chunk may accumulate on the
//! wire, how much request memory a chunk may pin, and the configured hard
//! cap. The dispatch concurrency is sized independently by
//! [`concurrency_for`]. Plans are computed fresh per invocation and never
//! cached.

pub mod executor;

pub use executor::{run_chunked, BatchOutcome, RetryPolicy};

/// How expensive a single item of this stage is for the scoring service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingComplexity {
    Low,
    Medium,
    High,
}

impl ProcessingComplexity {
    /// Chunk-size multiplier. Harder items get smaller chunks so one
    /// chunk's latency stays bounded.
    fn chunk_multiplier(self) -> f64 {
        match self {
            ProcessingComplexity::Low => 1.5,
            ProcessingComplexity::Medium => 1.0,
            ProcessingComplexity::High => 0.7,
        }
    }
}

/// Static constraints a chunk size must respect.
#[derive(Debug, Clone)]
pub struct BatchConstraints {
    pub max_chunk_size: usize,
    pub memory_limit_mb: u64,
    pub network_latency_ms: u64,
    pub complexity: ProcessingComplexity,
    /// How many chunks the scoring service handles concurrently.
    pub server_concurrency: usize,
}

/// Limits for the dispatch concurrency level.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimits {
    pub inputs_per_worker: usize,
    pub min_concurrency: usize,
    pub max_concurrency: Option<usize>,
}

/// Which candidate bound the final chunk size. Logged for tuning; no effect
/// on behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingConstraint {
    SmallWorkload,
    ServerConcurrency,
    NetworkLatency,
    MemoryBudget,
    ConfiguredCap,
}

/// Dispatch plan for one batch invocation.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub chunk_size: usize,
    pub concurrency: usize,
    pub binding_constraint: BindingConstraint,
}

/// Compute the chunk size for `total_inputs` items.
///
/// Small workloads (at most twice the server concurrency) get chunk size 1:
/// maximum parallelism and minimum latency, at the cost of per-item request
/// overhead. Larger workloads take the smallest of four candidates:
/// concurrency-based (scaled by complexity), network-optimal, memory-based,
/// and the configured cap. All inputs are clamped defensively; the result
/// is always at least 1.
pub fn chunk_size_for(total_inputs: usize, c: &BatchConstraints) -> (usize, BindingConstraint) {
    let total = total_inputs.max(1);
    let max_chunk = c.max_chunk_size.max(1);
    let server_concurrency = c.server_concurrency.max(1);

    if total <= 2 * server_concurrency {
        return (1, BindingConstraint::SmallWorkload);
    }

    let concurrency_based = ((total as f64 / server_concurrency as f64).ceil()
        * c.complexity.chunk_multiplier())
    .max(1.0);
    let network_based = (c.network_latency_ms as f64 / 10.0).clamp(3.0, max_chunk.max(3) as f64);
    let memory_based = (c.memory_limit_mb as f64 / 50.0).floor().max(1.0);

    let candidates = [
        (concurrency_based, BindingConstraint::ServerConcurrency),
        (network_based, BindingConstraint::NetworkLatency),
        (memory_based, BindingConstraint::MemoryBudget),
        (max_chunk as f64, BindingConstraint::ConfiguredCap),
    ];

    let (mut smallest, mut binding) = candidates[0];
    for (value, candidate) in candidates.into_iter().skip(1) {
        if value <= smallest {
            smallest = value;
            binding = candidate;
        }
    }

    let mut chunk_size = smallest.floor().max(1.0) as usize;
    if total <= max_chunk {
        // Avoid over-chunking a workload that already fits one chunk.
        chunk_size = chunk_size.min(total);
    }

    (chunk_size, binding)
}

/// Concurrency level for `work_count` items:
/// `max(ceil(work_count / inputs_per_worker), min_concurrency)`, capped at
/// `max_concurrency` when configured.
pub fn concurrency_for(work_count: usize, limits: &ConcurrencyLimits) -> usize {
    let per_worker = limits.inputs_per_worker.max(1);
    let needed = work_count.max(1).div_ceil(per_worker);
    let mut level = needed.max(limits.min_concurrency.max(1));
    if let Some(cap) = limits.max_concurrency {
        level = level.min(cap.max(1));
    }
    level
}

/// Full plan for one batch invocation.
pub fn plan_batch(
    total_inputs: usize,
    constraints: &BatchConstraints,
    limits: &ConcurrencyLimits,
) -> BatchPlan {
    let (chunk_size, binding_constraint) = chunk_size_for(total_inputs, constraints);
    BatchPlan {
        chunk_size,
        concurrency: concurrency_for(total_inputs, limits),
        binding_constraint,
    }
}
