//! Execution of one generation task against a backend
//!
//! A task walks `Pending -> RateLimited -> InFlight` and ends in `Succeeded`,
//! `Failed`, or loops through `RetryWait -> InFlight` while the retry policy
//! allows. Failures never escape as errors — the terminal state is always an
//! [`ImageResult`] value so sibling tasks keep running.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::core::{RateLimiter, RetryDecision, RetryPolicy};
use crate::error::BackendError;
use crate::models::{ImageResult, TaskPoll, TaskSpec};
use crate::traits::GenerationBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Pending,
    RateLimited,
    InFlight,
    RetryWait,
    Succeeded,
    Failed,
}

fn transition(log_prefix: &str, state: &mut TaskState, next: TaskState) {
    tracing::trace!("{} {:?} -> {:?}", log_prefix, state, next);
    *state = next;
}

pub struct TaskExecutor {
    backend: Arc<dyn GenerationBackend>,
    rate_limiter: Option<Arc<RateLimiter>>,
    retry: RetryPolicy,
    /// Global ceiling on in-flight backend calls across the whole run.
    permits: Arc<Semaphore>,
    poll_interval: Duration,
    max_wait: Duration,
}

impl TaskExecutor {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        rate_limiter: Option<Arc<RateLimiter>>,
        retry: RetryPolicy,
        permits: Arc<Semaphore>,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Self {
        Self {
            backend,
            rate_limiter,
            retry,
            permits,
            poll_interval,
            max_wait,
        }
    }

    /// Run one task to its terminal state.
    ///
    /// The global permit is acquired once, before rate limiting, and held
    /// across every retry so the run-wide in-flight ceiling counts retrying
    /// tasks too. It is released when this function returns, success or not.
    pub async fn execute(&self, index: usize, spec: TaskSpec, log_prefix: &str) -> ImageResult {
        let mut state = TaskState::Pending;
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return self.failed(index, spec, "task pool closed before dispatch".to_string())
            }
        };

        let mut attempt: u32 = 0;
        let mut previous_delay: Option<Duration> = None;

        loop {
            if let Some(limiter) = &self.rate_limiter {
                transition(log_prefix, &mut state, TaskState::RateLimited);
                limiter.acquire().await;
            }
            transition(log_prefix, &mut state, TaskState::InFlight);
            tracing::info!("{} 🎨 generating (attempt {})", log_prefix, attempt + 1);

            match self.attempt(&spec).await {
                Ok(task_id) => {
                    transition(log_prefix, &mut state, TaskState::Succeeded);
                    tracing::info!("{} ✅ done", log_prefix);
                    return ImageResult {
                        index,
                        output_path: spec.output_path.clone(),
                        task_id,
                        prompt: spec.prompt.clone(),
                        input_images: spec.input_urls.clone(),
                        success: true,
                        error: None,
                    };
                }
                Err(error) => {
                    attempt += 1;
                    let decision = self.retry.decide(
                        &error,
                        attempt,
                        previous_delay,
                        &mut rand::thread_rng(),
                    );
                    match decision {
                        RetryDecision::RetryAfter(delay) => {
                            transition(log_prefix, &mut state, TaskState::RetryWait);
                            tracing::warn!(
                                "{} ⚠️ attempt {} failed ({}), retrying in {:.1}s",
                                log_prefix,
                                attempt,
                                error,
                                delay.as_secs_f64()
                            );
                            previous_delay = Some(delay);
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::GiveUp => {
                            transition(log_prefix, &mut state, TaskState::Failed);
                            tracing::error!("{} ❌ failed: {}", log_prefix, error);
                            return self.failed(index, spec, error.to_string());
                        }
                    }
                }
            }
        }
    }

    /// One submit/poll/download attempt.
    async fn attempt(&self, spec: &TaskSpec) -> Result<String, BackendError> {
        let task_id = self.backend.submit(spec).await?;
        let started = Instant::now();

        loop {
            match self.backend.poll(&task_id).await? {
                TaskPoll::Success { result_urls } => {
                    let url = result_urls.first().ok_or_else(|| {
                        BackendError::InvalidResponse(
                            "task succeeded without result URLs".to_string(),
                        )
                    })?;
                    // The vendor-side generation cannot be rolled back, so a
                    // local download/write failure is terminal for the task:
                    // retrying would burn quota on a local I/O problem.
                    self.backend
                        .download(url, &spec.output_path)
                        .await
                        .map_err(|e| BackendError::Task {
                            message: format!("download failed after generation: {}", e),
                            retryable: false,
                        })?;
                    return Ok(task_id);
                }
                TaskPoll::Failed { message, retryable } => {
                    return Err(BackendError::Task { message, retryable });
                }
                TaskPoll::Pending => {
                    let waited = started.elapsed();
                    if waited > self.max_wait {
                        return Err(BackendError::DeadlineExceeded { task_id, waited });
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    fn failed(&self, index: usize, spec: TaskSpec, error: String) -> ImageResult {
        ImageResult {
            index,
            output_path: spec.output_path,
            task_id: String::new(),
            prompt: spec.prompt,
            input_images: spec.input_urls,
            success: false,
            error: Some(error),
        }
    }
}
