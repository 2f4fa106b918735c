//! Bounded worker pool: one `tokio::sync::Semaphore` permit per in-flight
//! task, `tokio::task::JoinSet` to drive them - the same combination the
//! teacher's `remote_storage::ConcurrencyLimiter` and
//! `storage_controller`/`pageserver` background task spawning use.
//!
//! Offers the two primitives spec.md §5 calls for: single-arg parallel
//! fan-out (`run_each`), and per-item ordered step sequences that run
//! concurrently with each other but sequentially within themselves
//! (`run_sequences`), used for a tablet's download-then-checksum pipeline.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::OrchestratorError;

pub type StepFuture = Pin<Box<dyn Future<Output = Result<String, OrchestratorError>> + Send>>;
pub type Step = Box<dyn FnOnce() -> StepFuture + Send>;

/// One tablet's (or file's) ordered pipeline: run `steps` in order, abort on
/// the first failure, and keep the output of `saved_result_index` as this
/// sequence's result.
pub struct StepSequence {
    pub steps: Vec<Step>,
    pub saved_result_index: usize,
}

pub struct TaskPool {
    semaphore: Arc<Semaphore>,
}

impl TaskPool {
    pub fn new(parallelism: u32) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(parallelism.max(1) as usize)) }
    }

    /// Runs `f` over every item in `items`, fanned out across the pool.
    /// Order of results matches order of `items`.
    pub async fn run_each<T, F, Fut>(&self, items: Vec<T>, f: F) -> Vec<Result<String, OrchestratorError>>
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, OrchestratorError>> + Send + 'static,
    {
        let f = Arc::new(f);
        let mut set = JoinSet::new();
        for (index, item) in items.into_iter().enumerate() {
            let sem = self.semaphore.clone();
            let f = f.clone();
            set.spawn(async move {
                let _permit = sem.acquire_owned().await.expect("semaphore closed");
                (index, f(item).await)
            });
        }
        let mut results: Vec<Option<Result<String, OrchestratorError>>> = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    if results.len() <= index {
                        results.resize_with(index + 1, || None);
                    }
                    results[index] = Some(result);
                }
                Err(join_error) => {
                    results.push(Some(Err(OrchestratorError::Other(anyhow::anyhow!("task panicked: {join_error}")))));
                }
            }
        }
        results.into_iter().map(|r| r.unwrap_or_else(|| Err(OrchestratorError::Other(anyhow::anyhow!("missing task result"))))).collect()
    }

    /// Runs every sequence concurrently, bounded by the same pool; within a
    /// sequence, steps run strictly in order and the first failure aborts
    /// that sequence without affecting the others.
    pub async fn run_sequences(&self, sequences: Vec<StepSequence>) -> Vec<Result<String, OrchestratorError>> {
        let mut set = JoinSet::new();
        for (index, sequence) in sequences.into_iter().enumerate() {
            let sem = self.semaphore.clone();
            set.spawn(async move {
                let _permit = sem.acquire_owned().await.expect("semaphore closed");
                let saved = sequence.saved_result_index;
                let mut outputs = Vec::with_capacity(sequence.steps.len());
                for step in sequence.steps {
                    match step().await {
                        Ok(output) => outputs.push(output),
                        Err(e) => return (index, Err(e)),
                    }
                }
                let result = outputs.into_iter().nth(saved).ok_or_else(|| {
                    OrchestratorError::Other(anyhow::anyhow!("saved_result_index {saved} out of range"))
                });
                (index, result)
            });
        }
        let mut results: Vec<Option<Result<String, OrchestratorError>>> = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    if results.len() <= index {
                        results.resize_with(index + 1, || None);
                    }
                    results[index] = Some(result);
                }
                Err(join_error) => {
                    results.push(Some(Err(OrchestratorError::Other(anyhow::anyhow!("task panicked: {join_error}")))));
                }
            }
        }
        results.into_iter().map(|r| r.unwrap_or_else(|| Err(OrchestratorError::Other(anyhow::anyhow!("missing task result"))))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_each_preserves_order() {
        let pool = TaskPool::new(2);
        let results = pool.run_each(vec![1, 2, 3], |n| async move { Ok(n.to_string()) }).await;
        let values: Vec<String> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn run_sequences_returns_saved_step_and_stops_on_failure() {
        let pool = TaskPool::new(4);
        let ok_sequence = StepSequence {
            steps: vec![
                Box::new(|| Box::pin(async { Ok("first".to_string()) }) as StepFuture),
                Box::new(|| Box::pin(async { Ok("second".to_string()) }) as StepFuture),
            ],
            saved_result_index: 1,
        };
        let failing_sequence = StepSequence {
            steps: vec![
                Box::new(|| Box::pin(async { Err(OrchestratorError::InvalidArgument("boom".into())) }) as StepFuture),
                Box::new(|| Box::pin(async { Ok("unreached".to_string()) }) as StepFuture),
            ],
            saved_result_index: 1,
        };
        let results = pool.run_sequences(vec![ok_sequence, failing_sequence]).await;
        assert_eq!(results[0].as_ref().unwrap(), "second");
        assert!(results[1].is_err());
    }
}
