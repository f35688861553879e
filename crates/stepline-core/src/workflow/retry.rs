//! Retry handler for compute steps.
//!
//! Retries are opt-in: a step without a `RetryPolicy` fails its instance on
//! the first error. With a policy, the step is re-run in-process after a
//! fixed or exponential delay until it succeeds or `max_attempts` is spent.

use std::time::Duration;

use stepline_types::workflow::{Backoff, RetryPolicy};

/// Stateless retry handler. All logic lives in associated functions that
/// take the policy as a parameter.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether another attempt is allowed after `attempt` failed.
    ///
    /// `attempt` is 1-based (first execution is attempt 1).
    pub fn should_retry(policy: &RetryPolicy, attempt: u32) -> bool {
        attempt < policy.max_attempts
    }

    /// Delay before the attempt following `attempt`.
    pub fn delay_for(policy: &RetryPolicy, attempt: u32) -> Duration {
        let base = policy.base_delay_ms;
        let millis = match policy.backoff {
            Backoff::Fixed => base,
            Backoff::Exponential => {
                let shift = attempt.saturating_sub(1).min(32);
                base.saturating_mul(1u64 << shift)
            }
        };
        Duration::from_millis(millis.min(policy.max_delay_ms))
    }
}
