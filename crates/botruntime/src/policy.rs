//! Per-node timeout and retry policy.

use botcore::{to_number, Map, NodeError, Value};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::time::{sleep, timeout, Duration};

pub const TIMEOUT_KEY: &str = "__timeout_ms";
pub const RETRY_COUNT_KEY: &str = "__retry_count";
pub const RETRY_DELAY_KEY: &str = "__retry_delay_ms";
pub const BACKOFF_KEY: &str = "__retry_backoff";

const TIMEOUT_RANGE: (u64, u64) = (1, 300_000);
const MAX_RETRIES: u64 = 10;
const MAX_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Fixed,
    Exponential,
}

/// Resolved timeout/retry settings for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionPolicy {
    pub timeout_ms: Option<u64>,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub backoff: Backoff,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            retry_count: 0,
            retry_delay_ms: 1000,
            backoff: Backoff::Fixed,
        }
    }
}

fn numeric(value: &Value) -> Option<u64> {
    match value {
        Value::Null => return None,
        Value::String(s) if s.trim().is_empty() => return None,
        _ => {}
    }
    let n = to_number(value)?;
    if !n.is_finite() {
        return None;
    }
    // Negative overrides clamp to the floor of their range.
    Some(n.max(0.0).round() as u64)
}

impl ExecutionPolicy {
    /// Overlay the reserved override keys of `params` on `defaults`, clamp
    /// them, and remove them from `params`.
    pub fn resolve(params: &mut Map, defaults: &ExecutionPolicy) -> Self {
        let mut policy = defaults.clone();

        if let Some(ms) = params.remove(TIMEOUT_KEY).as_ref().and_then(numeric) {
            policy.timeout_ms = Some(ms.clamp(TIMEOUT_RANGE.0, TIMEOUT_RANGE.1));
        }
        if let Some(count) = params.remove(RETRY_COUNT_KEY).as_ref().and_then(numeric) {
            policy.retry_count = count.min(MAX_RETRIES) as u32;
        }
        if let Some(delay) = params.remove(RETRY_DELAY_KEY).as_ref().and_then(numeric) {
            policy.retry_delay_ms = delay.min(MAX_DELAY_MS);
        }
        if let Some(kind) = params.remove(BACKOFF_KEY) {
            policy.backoff = match kind.as_str().map(str::to_ascii_lowercase).as_deref() {
                Some("exponential") => Backoff::Exponential,
                _ => Backoff::Fixed,
            };
        }

        policy
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry_count + 1
    }

    /// Delay before the retry that follows failed `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let ms = match self.backoff {
            Backoff::Fixed => self.retry_delay_ms,
            Backoff::Exponential => {
                let shift = attempt.saturating_sub(1).min(20);
                self.retry_delay_ms.saturating_mul(1u64 << shift).min(MAX_DELAY_MS)
            }
        };
        Duration::from_millis(ms)
    }
}

/// Run `attempt_fn` under `policy`. Returns the result and the number of
/// attempts made. Exhaustion wraps the last error in
/// [`NodeError::Exhausted`].
pub async fn run_with_policy<T, F, Fut>(
    policy: &ExecutionPolicy,
    action_id: &str,
    mut attempt_fn: F,
) -> (Result<T, NodeError>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, NodeError>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1u32;

    loop {
        let result = match policy.timeout_ms {
            Some(ms) => match timeout(Duration::from_millis(ms), attempt_fn(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(NodeError::Timeout {
                    action_id: action_id.to_string(),
                    millis: ms,
                }),
            },
            None => attempt_fn(attempt).await,
        };

        match result {
            Ok(value) => return (Ok(value), attempt),
            Err(e) if attempt >= max_attempts => {
                return (
                    Err(NodeError::Exhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    }),
                    attempt,
                );
            }
            Err(e) => {
                let delay = policy.backoff_delay(attempt);
                tracing::warn!(
                    "Action '{}' attempt {}/{} failed: {}. Retrying in {}ms",
                    action_id,
                    attempt,
                    max_attempts,
                    e,
                    delay.as_millis()
                );
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
