//! Sliding time-window request admission control

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Admits at most `max_requests` calls within any trailing `window`.
///
/// Callers block in [`acquire`](RateLimiter::acquire) until admission would
/// not exceed the limit. Admission timestamps are pruned on every check, so
/// the window slides with real time rather than fixed buckets.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    epsilon: Duration,
    admissions: Mutex<Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            epsilon: Duration::from_millis(100),
            admissions: Mutex::new(Vec::new()),
        }
    }

    /// Block until one more request may be admitted, then record it.
    ///
    /// The wait computed from the oldest admission is only a hint; other
    /// callers may be admitted while we sleep, so the whole check re-runs
    /// after every wake-up.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut admissions = self.admissions.lock().await;
                let now = Instant::now();
                admissions.retain(|t| now.duration_since(*t) < self.window);

                if admissions.len() < self.max_requests {
                    admissions.push(now);
                    return;
                }

                let oldest = admissions[0];
                self.window - now.duration_since(oldest) + self.epsilon
            };

            tracing::debug!("rate limit reached, waiting {:.1}s", wait.as_secs_f64());
            tokio::time::sleep(wait).await;
        }
    }

    /// Admissions currently inside the trailing window.
    pub async fn in_window(&self) -> usize {
        let mut admissions = self.admissions.lock().await;
        let now = Instant::now();
        admissions.retain(|t| now.duration_since(*t) < self.window);
        admissions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn admits_up_to_limit_without_waiting() {
        let limiter = RateLimiter::new(5, Duration::from_secs(10));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(limiter.in_window().await, 5);
    }

    #[tokio::test]
    async fn never_exceeds_limit_in_any_trailing_window() {
        let window = Duration::from_millis(300);
        let max_requests = 4;
        let limiter = Arc::new(RateLimiter::new(max_requests, window));

        let mut handles = Vec::new();
        for _ in 0..max_requests + 6 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut admitted = Vec::new();
        for handle in handles {
            admitted.push(handle.await.unwrap());
        }
        admitted.sort();

        // Slide a window over the recorded admission times: no window may
        // contain more than max_requests admissions.
        for (i, start) in admitted.iter().enumerate() {
            let inside = admitted[i..]
                .iter()
                .take_while(|t| t.duration_since(*start) < window)
                .count();
            assert!(
                inside <= max_requests,
                "window starting at admission {} held {} admissions",
                i,
                inside
            );
        }
    }
}
