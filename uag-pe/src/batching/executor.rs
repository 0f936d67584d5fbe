//! Chunked dispatch against the scoring service with sweep-based retry
//!
//! Requests are partitioned into chunks and dispatched with bounded
//! concurrency, one remote call per chunk. Chunks that fail with a
//! retryable error are collected and redispatched in later sweeps, each
//! sweep preceded by a fixed delay plus exponential backoff. A chunk that
//! exhausts its retries contributes zero items; sibling chunks are
//! unaffected. Results merge in chunk-dispatch order no matter which sweep
//! a chunk succeeded in.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::time::Duration;

use crate::batching::BatchPlan;
use crate::services::scoring_client::ScoringError;

/// Retry behavior for failed chunks.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retry sweeps after the initial dispatch.
    pub max_retries: u32,
    /// Base for the exponential backoff component.
    pub base_delay_ms: u64,
    /// Fixed delay between retry sweeps.
    pub sweep_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            sweep_delay_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry sweep `sweep` (1-based):
    /// `sweep_delay + base_delay * 2^(sweep - 1)`.
    fn delay_before_sweep(&self, sweep: u32) -> Duration {
        let backoff = self
            .base_delay_ms
            .saturating_mul(1u64 << (sweep - 1).min(16));
        Duration::from_millis(self.sweep_delay_ms.saturating_add(backoff))
    }
}

/// Result of one chunked batch execution.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    /// Successful items, concatenated in chunk-dispatch order.
    pub items: Vec<T>,
    /// Chunks the input was partitioned into.
    pub dispatched_chunks: usize,
    /// Chunks that never succeeded.
    pub failed_chunks: usize,
    /// Total chunk dispatch attempts across all sweeps.
    pub attempts: usize,
}

/// Execute `requests` against `send_chunk` per the plan.
///
/// `send_chunk` is one remote call; it must be idempotent at the chunk
/// level (the scoring service is a pure function of its input).
pub async fn run_chunked<Req, Item, F, Fut>(
    requests: Vec<Req>,
    plan: &BatchPlan,
    retry: &RetryPolicy,
    send_chunk: F,
) -> BatchOutcome<Item>
where
    Req: Clone,
    F: Fn(Vec<Req>) -> Fut,
    Fut: Future<Output = Result<Vec<Item>, ScoringError>>,
{
    if requests.is_empty() {
        return BatchOutcome {
            items: Vec::new(),
            dispatched_chunks: 0,
            failed_chunks: 0,
            attempts: 0,
        };
    }

    let chunk_size = plan.chunk_size.max(1);
    let chunks: Vec<Vec<Req>> = requests.chunks(chunk_size).map(<[Req]>::to_vec).collect();
    let total_chunks = chunks.len();

    let mut slots: Vec<Option<Vec<Item>>> = (0..total_chunks).map(|_| None).collect();
    let mut pending: Vec<usize> = (0..total_chunks).collect();
    let mut attempts = 0usize;

    for sweep in 0..=retry.max_retries {
        if pending.is_empty() {
            break;
        }
        if sweep > 0 {
            let delay = retry.delay_before_sweep(sweep);
            tracing::debug!(
                sweep,
                chunks = pending.len(),
                delay_ms = delay.as_millis() as u64,
                "Backing off before retry sweep"
            );
            tokio::time::sleep(delay).await;
        }

        let send = &send_chunk;
        let sweep_results: Vec<(usize, Result<Vec<Item>, ScoringError>)> =
            stream::iter(pending.iter().copied().map(|idx| {
                let chunk = chunks[idx].clone();
                async move { (idx, send(chunk).await) }
            }))
            .buffered(plan.concurrency.max(1))
            .collect()
            .await;
        attempts += sweep_results.len();

        let mut still_failing = Vec::new();
        for (idx, result) in sweep_results {
            match result {
                Ok(items) => {
                    slots[idx] = Some(items);
                }
                Err(err) if err.is_retryable() && sweep < retry.max_retries => {
                    tracing::warn!(chunk = idx, sweep, error = %err, "Chunk failed, queued for retry");
                    still_failing.push(idx);
                }
                Err(err) => {
                    tracing::warn!(chunk = idx, sweep, error = %err, "Chunk failed for good, yields no results");
                }
            }
        }
        pending = still_failing;
    }

    let failed_chunks = slots.iter().filter(|slot| slot.is_none()).count();
    let items: Vec<Item> = slots.into_iter().flatten().flatten().collect();

    BatchOutcome {
        items,
        dispatched_chunks: total_chunks,
        failed_chunks,
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::{BatchPlan, BindingConstraint};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn plan(chunk_size: usize, concurrency: usize) -> BatchPlan {
        BatchPlan {
            chunk_size,
            concurrency,
            binding_constraint: BindingConstraint::ConfiguredCap,
        }
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
            sweep_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn all_chunks_succeed_without_loss_or_duplication() {
        let inputs: Vec<u32> = (0..37).collect();

        let outcome = run_chunked(inputs.clone(), &plan(5, 3), &fast_retry(2), |chunk| async move {
            Ok(chunk.iter().map(|n| n * 10).collect())
        })
        .await;

        assert_eq!(outcome.dispatched_chunks, 8);
        assert_eq!(outcome.failed_chunks, 0);
        assert_eq!(outcome.attempts, 8);
        let expected: Vec<u32> = inputs.iter().map(|n| n * 10).collect();
        assert_eq!(outcome.items, expected);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        // The chunk containing 7 fails on its first two dispatches.
        let failures = Mutex::new(HashMap::<u32, u32>::new());

        let outcome = run_chunked(
            (0..20).collect::<Vec<u32>>(),
            &plan(4, 2),
            &fast_retry(3),
            |chunk: Vec<u32>| {
                let poisoned = chunk.contains(&7);
                let attempt = if poisoned {
                    let mut map = failures.lock().unwrap();
                    let counter = map.entry(7).or_insert(0);
                    *counter += 1;
                    *counter
                } else {
                    0
                };
                async move {
                    if poisoned && attempt <= 2 {
                        Err(ScoringError::Timeout)
                    } else {
                        Ok(chunk)
                    }
                }
            },
        )
        .await;

        assert_eq!(outcome.failed_chunks, 0);
        assert_eq!(outcome.items.len(), 20);
        // 5 chunks + 2 redispatches of the poisoned one.
        assert_eq!(outcome.attempts, 7);
        // Merge order follows chunk order even though one chunk was late.
        assert_eq!(outcome.items, (0..20).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn exhausted_chunk_is_isolated() {
        let outcome = run_chunked(
            (0..20).collect::<Vec<u32>>(),
            &plan(4, 2),
            &fast_retry(2),
            |chunk: Vec<u32>| async move {
                if chunk.contains(&9) {
                    Err(ScoringError::Api(503, "overloaded".to_string()))
                } else {
                    Ok(chunk)
                }
            },
        )
        .await;

        assert_eq!(outcome.dispatched_chunks, 5);
        assert_eq!(outcome.failed_chunks, 1);
        // Initial sweep (5) plus two retries of the failing chunk.
        assert_eq!(outcome.attempts, 7);
        let expected: Vec<u32> = (0..20).filter(|n| !(8..12).contains(n)).collect();
        assert_eq!(outcome.items, expected);
    }

    #[tokio::test]
    async fn validation_rejections_are_not_retried() {
        let outcome = run_chunked(
            (0..8).collect::<Vec<u32>>(),
            &plan(4, 2),
            &fast_retry(3),
            |chunk: Vec<u32>| async move {
                if chunk.contains(&1) {
                    Err(ScoringError::Rejected("missing field".to_string()))
                } else {
                    Ok(chunk)
                }
            },
        )
        .await;

        assert_eq!(outcome.failed_chunks, 1);
        // No redispatch for the rejected chunk.
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.items, vec![4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let outcome = run_chunked(
            Vec::<u32>::new(),
            &plan(4, 2),
            &fast_retry(3),
            |chunk: Vec<u32>| async move { Ok(chunk) },
        )
        .await;

        assert!(outcome.items.is_empty());
        assert_eq!(outcome.dispatched_chunks, 0);
        assert_eq!(outcome.attempts, 0);
    }
}
