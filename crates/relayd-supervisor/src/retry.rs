//! Bounded retry with backoff.
//!
//! The delay before retry `n` is `delay × factor^n`, clamped to `max_delay`.
//! A factor of `1.0` gives the fixed-interval polling used for destination
//! resolution.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
	/// Total attempts, including the first one.
	pub attempts: u32,
	pub delay: Duration,
	pub factor: f64,
	pub max_delay: Duration,
}

#[derive(Debug, Error, PartialEq)]
pub enum RetryError<E> {
	/// Every attempt ran without producing a value.
	#[error("gave up after {attempts} attempts")]
	Exhausted { attempts: u32, last_error: Option<E> },
}

impl RetryPolicy {
	pub fn fixed(attempts: u32, delay: Duration) -> Self {
		Self {
			attempts,
			delay,
			factor: 1.0,
			max_delay: delay,
		}
	}

	pub fn delay_for(&self, retry: u32) -> Duration {
		let exp = retry.min(i32::MAX as u32) as i32;
		let secs = self.delay.as_secs_f64() * self.factor.powi(exp);
		if !secs.is_finite() || secs < 0.0 || secs > self.max_delay.as_secs_f64() {
			self.max_delay
		} else {
			Duration::from_secs_f64(secs)
		}
	}

	/// Worst-case time spent sleeping across all attempts.
	pub fn total_wait(&self) -> Duration {
		(0..self.attempts.saturating_sub(1)).map(|n| self.delay_for(n)).sum()
	}

	/// Runs `op` until it yields `Ok(Some(_))` or the attempts run out.
	///
	/// `Ok(None)` means "not ready yet" and `Err(_)` a transient failure; both
	/// are retried. `op` receives the zero-based attempt number.
	pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
	where
		F: FnMut(u32) -> Fut,
		Fut: Future<Output = Result<Option<T>, E>>,
	{
		let mut last_error = None;
		for attempt in 0..self.attempts {
			if attempt > 0 {
				tokio::time::sleep(self.delay_for(attempt - 1)).await;
			}
			match op(attempt).await {
				Ok(Some(value)) => return Ok(value),
				Ok(None) => {}
				Err(e) => last_error = Some(e),
			}
		}
		Err(RetryError::Exhausted {
			attempts: self.attempts,
			last_error,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	#[test]
	fn fixed_policy_is_constant() {
		let policy = RetryPolicy::fixed(15, Duration::from_secs(2));
		assert_eq!(policy.delay_for(0), Duration::from_secs(2));
		assert_eq!(policy.delay_for(9), Duration::from_secs(2));
		assert_eq!(policy.total_wait(), Duration::from_secs(28));
	}

	#[test]
	fn growth_is_capped() {
		let policy = RetryPolicy {
			attempts: 10,
			delay: Duration::from_millis(100),
			factor: 2.0,
			max_delay: Duration::from_secs(1),
		};
		assert_eq!(policy.delay_for(1), Duration::from_millis(200));
		assert_eq!(policy.delay_for(10), Duration::from_secs(1));
	}

	#[tokio::test(start_paused = true)]
	async fn succeeds_once_ready() {
		let calls = AtomicU32::new(0);
		let policy = RetryPolicy::fixed(5, Duration::from_secs(2));
		let start = tokio::time::Instant::now();

		let result: Result<&str, RetryError<String>> = policy
			.run(|attempt| {
				calls.fetch_add(1, Ordering::SeqCst);
				async move {
					match attempt {
						0 => Err("boom".to_string()),
						1 => Ok(None),
						_ => Ok(Some("ready")),
					}
				}
			})
			.await;

		assert_eq!(result, Ok("ready"));
		assert_eq!(calls.load(Ordering::SeqCst), 3);
		assert_eq!(start.elapsed(), Duration::from_secs(4));
	}

	#[tokio::test(start_paused = true)]
	async fn exhaustion_keeps_last_error() {
		let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
		let result: Result<(), RetryError<u32>> =
			policy.run(|attempt| async move { Err(attempt) }).await;
		assert_eq!(
			result,
			Err(RetryError::Exhausted {
				attempts: 3,
				last_error: Some(2)
			})
		);
	}
}
