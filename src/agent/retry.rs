//! Retry orchestration with exponential backoff.
//!
//! Wraps an arbitrary async operation with attempt counting, per-error-kind
//! retry eligibility, and lifecycle hooks. The classifier decides what an
//! error *is*; the policy decides whether it is worth another attempt.
//!
//! The final unrecoverable error is returned unchanged, never wrapped, so
//! callers can still pattern-match on the original message.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::classify::classify;
use crate::domain::{ClassifiedError, ErrorKind, Platform};

/// Hard cap on retries for rate-limited failures, independent of the policy.
/// Hammering a provider-side throttle with the full retry budget compounds it.
const MAX_RATE_LIMIT_RETRIES: u32 = 2;

/// Backoff and eligibility policy for one orchestrated call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Upper bound on any single delay
    pub max_delay: Duration,

    /// Growth factor per attempt
    pub backoff_multiplier: f64,

    /// Error kinds eligible for retry (must also be classifier-retryable)
    pub retryable_kinds: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            retryable_kinds: vec![
                ErrorKind::Timeout,
                ErrorKind::RateLimited,
                ErrorKind::NetworkError,
                ErrorKind::ExecutionFailed,
                ErrorKind::Unknown,
            ],
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (1-based).
    ///
    /// min(base · multiplier^(attempt−1) · (1 + jitter ≤ 10%), max). The
    /// jitter desynchronizes retry storms when many operations fail together.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let base_ms = self.base_delay.as_millis() as f64;
        let raw = base_ms * self.backoff_multiplier.powi(exponent) * jitter_factor();
        let capped = raw.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

fn jitter_factor() -> f64 {
    let mut buf = [0u8; 8];
    if getrandom::getrandom(&mut buf).is_ok() {
        1.0 + 0.1 * (u64::from_le_bytes(buf) as f64 / u64::MAX as f64)
    } else {
        1.0
    }
}

/// Optional lifecycle hooks, each independently absent.
#[derive(Default)]
pub struct RetryHooks {
    /// Called before each scheduled retry with the attempt that just failed
    pub on_retry: Option<Box<dyn Fn(u32, &ClassifiedError) + Send + Sync>>,

    /// Called once on success with the attempt that succeeded
    pub on_success: Option<Box<dyn Fn(u32) + Send + Sync>>,

    /// Called once when the call is given up
    pub on_failure: Option<Box<dyn Fn(&ClassifiedError) + Send + Sync>>,

    /// When present, overrides the policy/classifier eligibility decision
    pub should_retry: Option<Box<dyn Fn(&ClassifiedError, u32) -> bool + Send + Sync>>,
}

/// Introspection snapshot of one in-flight orchestrated call.
#[derive(Debug, Clone)]
pub struct ActiveOperation {
    pub id: String,
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub attempt: u32,
    pub last_error: Option<String>,
}

/// Registry of in-flight orchestrated calls.
///
/// Exists for introspection and [`cancel_all`](RetryRegistry::cancel_all)
/// only; correctness never depends on it. Injectable so tests get isolated
/// instances.
#[derive(Debug, Default)]
pub struct RetryRegistry {
    inner: Mutex<HashMap<String, ActiveOperation>>,
}

impl RetryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, id: &str, operation: &str) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(
            id.to_string(),
            ActiveOperation {
                id: id.to_string(),
                operation: operation.to_string(),
                started_at: Utc::now(),
                attempt: 1,
                last_error: None,
            },
        );
    }

    fn update(&self, id: &str, attempt: u32, last_error: Option<&str>) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = guard.get_mut(id) {
            state.attempt = attempt;
            if let Some(err) = last_error {
                state.last_error = Some(err.to_string());
            }
        }
    }

    fn remove(&self, id: &str) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(id);
    }

    fn contains(&self, id: &str) -> bool {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.contains_key(id)
    }

    /// Snapshot of every in-flight operation.
    pub fn active_operations(&self) -> Vec<ActiveOperation> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.values().cloned().collect()
    }

    /// Clear the registry, preventing further scheduled retries for every
    /// tracked operation. Does not abort attempts already in flight; those
    /// finish (or fail) on their own and simply stop rescheduling.
    pub fn cancel_all(&self) -> usize {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let cancelled = guard.len();
        guard.clear();
        cancelled
    }
}

/// Drives operations through the retry loop.
pub struct RetryOrchestrator {
    registry: Arc<RetryRegistry>,
    platform: Platform,
    tool_name: String,
}

impl RetryOrchestrator {
    pub fn new(registry: Arc<RetryRegistry>, tool_name: impl Into<String>) -> Self {
        Self {
            registry,
            platform: Platform::current(),
            tool_name: tool_name.into(),
        }
    }

    #[cfg(test)]
    fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// The registry this orchestrator tracks operations in.
    pub fn registry(&self) -> &Arc<RetryRegistry> {
        &self.registry
    }

    /// Run `op` with retries per `policy`, reporting through `hooks`.
    ///
    /// On final failure the original error is returned as-is. Non-retryable
    /// classifications (missing install, permission, version) give up on the
    /// first attempt no matter what the policy allows.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        operation_name: &str,
        policy: &RetryPolicy,
        hooks: &RetryHooks,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let id = uuid::Uuid::new_v4().to_string();
        self.registry.insert(&id, operation_name);
        let max_attempts = policy.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if let Some(on_success) = &hooks.on_success {
                        on_success(attempt);
                    }
                    self.registry.remove(&id);
                    return Ok(value);
                }
                Err(err) => {
                    // An error classified upstream keeps its kind, severity,
                    // and remediation; only raw errors go through the
                    // classifier here.
                    let classified = match err.downcast_ref::<ClassifiedError>() {
                        Some(classified) => classified.clone(),
                        None => classify(&err.to_string(), None, self.platform, &self.tool_name),
                    };
                    self.registry.update(&id, attempt, Some(&classified.message));

                    let budget_left = attempt < max_attempts
                        && !(classified.kind == ErrorKind::RateLimited
                            && attempt > MAX_RATE_LIMIT_RETRIES);

                    let eligible = match &hooks.should_retry {
                        Some(should_retry) => should_retry(&classified, attempt),
                        None => {
                            classified.is_retryable
                                && policy.retryable_kinds.contains(&classified.kind)
                        }
                    };

                    // cancel_all() empties the registry; a missing entry means
                    // no further retries may be scheduled
                    let still_scheduled = self.registry.contains(&id);

                    if !(budget_left && eligible && still_scheduled) {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            kind = %classified.kind,
                            "Giving up"
                        );
                        if let Some(on_failure) = &hooks.on_failure {
                            on_failure(&classified);
                        }
                        self.registry.remove(&id);
                        return Err(err);
                    }

                    let delay = policy.delay_for(attempt);
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        kind = %classified.kind,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after backoff"
                    );
                    if let Some(on_retry) = &hooks.on_retry {
                        on_retry(attempt, &classified);
                    }
                    // Always completes: accepting a retry already accepted
                    // this much extra latency
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
