//! The Sequence Scheduler: walks sequences in authored order, running each
//! one either sequentially (with inter-request delay) or concurrently
//! (bounded by `ConcurrencyLimit`, no delay), using a `tokio::sync::Semaphore`
//! to cap how many requests in a concurrent sequence are in flight at once.

use crate::config::{ResolvedPlan, SequenceMeta};
use crate::executor::{Executor, RequestOutcome};
use crate::model::{EffectiveRequest, SequenceType};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};

/// Runs every sequence in `plan` against `executor`, in authored order.
/// The returned vector is in authored `(sequence_index, request_index)`
/// order regardless of how concurrent requests actually completed.
pub async fn run(plan: &ResolvedPlan, executor: &Executor) -> Vec<RequestOutcome> {
    let mut outcomes = Vec::with_capacity(plan.requests.len());
    let sequence_count = plan.sequences.len();

    for (seq_pos, meta) in plan.sequences.iter().enumerate() {
        let sequence_index = seq_pos + 1;
        let requests: Vec<&EffectiveRequest> = plan
            .requests
            .iter()
            .filter(|r| r.sequence_index == sequence_index)
            .collect();

        let mut sequence_outcomes = match meta.kind {
            SequenceType::Sequential => run_sequential(executor, &requests).await,
            SequenceType::Concurrent => run_concurrent(executor, &requests, meta).await,
        };

        outcomes.append(&mut sequence_outcomes);

        if seq_pos + 1 < sequence_count && plan.inter_sequence_delay_seconds > 0 {
            sleep(Duration::from_secs(plan.inter_sequence_delay_seconds)).await;
        }
    }

    outcomes
}

async fn run_sequential(executor: &Executor, requests: &[&EffectiveRequest]) -> Vec<RequestOutcome> {
    let mut outcomes = Vec::with_capacity(requests.len());
    for (idx, request) in requests.iter().enumerate() {
        let outcome = executor.execute(request).await;
        let delay = request.flow_control.delay_seconds;
        outcomes.push(outcome);
        if idx + 1 < requests.len() && delay > 0 {
            sleep(Duration::from_secs(delay)).await;
        }
    }
    outcomes
}

async fn run_concurrent(
    executor: &Executor,
    requests: &[&EffectiveRequest],
    meta: &SequenceMeta,
) -> Vec<RequestOutcome> {
    let limit = meta.concurrency_limit.unwrap_or(requests.len().max(1));
    let semaphore = Arc::new(Semaphore::new(limit));

    let mut handles = Vec::with_capacity(requests.len());
    for request in requests {
        let request = (*request).clone();
        let semaphore = Arc::clone(&semaphore);
        let executor = executor.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore is never closed");
            executor.execute(&request).await
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await.expect("request task should not panic"));
    }
    outcomes
}
