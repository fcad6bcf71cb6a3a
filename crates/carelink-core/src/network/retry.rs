//! Retry policy for fetch cycles.
//!
//! Provides:
//! - Attempt bound (larger when proxies are available to rotate through)
//! - Deterministic exponential backoff, `base^attempt` seconds with 1-based attempts
//! - A fixed short delay after swapping proxies
//! - Per-cycle statistics

use crate::config::FetchConfig;
use crate::error::{CareLinkError, FailureClass};
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of backoff attempts (including the first one).
    pub max_attempts: u32,
    /// Delay unit multiplied by the exponential factor.
    pub base_delay: Duration,
    /// Exponential base (2 for doubling).
    pub exponential_base: u32,
    /// Wait after binding a new proxy.
    pub proxy_swap_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: FetchConfig::DIRECT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
            exponential_base: FetchConfig::BACKOFF_BASE,
            proxy_swap_delay: FetchConfig::PROXY_SWAP_DELAY,
        }
    }
}

impl RetryConfig {
    /// Policy for a client with or without proxy candidates.
    pub fn for_proxies(has_proxies: bool) -> Self {
        let max_attempts = if has_proxies {
            FetchConfig::PROXY_MAX_ATTEMPTS
        } else {
            FetchConfig::DIRECT_MAX_ATTEMPTS
        };
        Self::default().with_max_attempts(max_attempts)
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the delay applied after a proxy swap.
    pub fn with_proxy_swap_delay(mut self, delay: Duration) -> Self {
        self.proxy_swap_delay = delay;
        self
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let factor = self.exponential_base.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }

    /// Decide what to do after `attempt` failed with `error`.
    pub fn decide(&self, error: &CareLinkError, attempt: u32) -> RetryDecision {
        match error.failure_class() {
            FailureClass::Fatal => RetryDecision::Propagate,
            FailureClass::Transient => RetryDecision::SwapProxy,
            FailureClass::Unclassified if attempt >= self.max_attempts => RetryDecision::Propagate,
            FailureClass::Unclassified => RetryDecision::Backoff {
                delay: self.calculate_delay(attempt),
            },
        }
    }
}

/// Next step after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the error to the caller.
    Propagate,
    /// Bind the next proxy candidate (propagate if none remain).
    SwapProxy,
    /// Sleep, then retry with the next attempt number.
    Backoff { delay: Duration },
}

/// Statistics about one fetch cycle.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Attempts run, including retries after a proxy swap.
    pub attempts: u32,
    /// Proxies bound after the initial one.
    pub proxy_swaps: u32,
    /// Total time spent sleeping between attempts.
    pub total_delay: Duration,
    /// Whether the cycle produced a snapshot.
    pub success: bool,
    /// Last error message if failed.
    pub last_error: Option<String>,
}
