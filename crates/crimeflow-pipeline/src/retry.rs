//! Retry logic: backoff between attempts and an error-kind policy table deciding which failures
//! are worth another attempt.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crimeflow_types::{ErrorKind, PipelineError, Result};

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential { base: Duration, max: Duration },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Compute the delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let millis = (base.as_millis() as u64)
                    .saturating_mul(2u64.saturating_pow(attempt as u32));
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Fixed(Duration::from_secs(300))
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// How one error kind is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryRule {
    pub retryable: bool,
    /// Caps the retries for this kind; `None` uses the task's retry budget.
    pub max_retries: Option<usize>,
}

impl RetryRule {
    pub const NEVER: RetryRule = RetryRule {
        retryable: false,
        max_retries: None,
    };
    pub const BUDGET: RetryRule = RetryRule {
        retryable: true,
        max_retries: None,
    };
}

/// Named presets selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicyName {
    #[default]
    TransientOnly,
    Uniform,
}

/// Error kind → retry rule. Kinds without an entry are never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    rules: HashMap<ErrorKind, RetryRule>,
}

impl RetryPolicy {
    /// Retry transport, sink and I/O failures; fail fast on schema and parse errors.
    pub fn transient_only() -> Self {
        let rules = ErrorKind::ALL
            .iter()
            .map(|&k| {
                let rule = if k.is_transient() {
                    RetryRule::BUDGET
                } else {
                    RetryRule::NEVER
                };
                (k, rule)
            })
            .collect();
        Self { rules }
    }

    /// Retry every failure up to the task's budget.
    pub fn uniform() -> Self {
        Self {
            rules: ErrorKind::ALL.iter().map(|&k| (k, RetryRule::BUDGET)).collect(),
        }
    }

    pub fn from_name(name: RetryPolicyName) -> Self {
        match name {
            RetryPolicyName::TransientOnly => Self::transient_only(),
            RetryPolicyName::Uniform => Self::uniform(),
        }
    }

    pub fn with_rule(mut self, kind: ErrorKind, rule: RetryRule) -> Self {
        self.rules.insert(kind, rule);
        self
    }

    pub fn rule(&self, kind: ErrorKind) -> RetryRule {
        self.rules.get(&kind).copied().unwrap_or(RetryRule::NEVER)
    }

    /// How many retries `err` is allowed, given the task's budget.
    pub fn retries_for(&self, err: &PipelineError, budget: usize) -> usize {
        let rule = self.rule(err.kind());
        if !rule.retryable {
            return 0;
        }
        rule.max_retries.map_or(budget, |m| m.min(budget))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::transient_only()
    }
}

// ---------------------------------------------------------------------------
// execute_with_retry
// ---------------------------------------------------------------------------

/// Progress reported by [`execute_with_retry`] as attempts start and fail.
#[derive(Debug)]
pub enum Attempt<'a> {
    /// Attempt number `attempt` (1-based) is starting.
    Started { attempt: usize },
    /// Attempt `attempt` failed and another one follows after `delay`.
    Retrying {
        attempt: usize,
        delay: Duration,
        error: &'a PipelineError,
    },
}

/// Execute `f` with retries.
///
/// `f` receives the 1-based attempt number and is called at most `max_retries + 1` times. After a
/// failure the policy decides whether the error kind may be retried; between attempts the
/// function sleeps for the duration dictated by `backoff`. Returns the final result together with
/// the number of attempts made.
pub async fn execute_with_retry<F, Fut, T>(
    mut f: F,
    max_retries: usize,
    policy: &RetryPolicy,
    backoff: &BackoffPolicy,
    task_id: &str,
    mut observe: impl FnMut(Attempt<'_>),
) -> (Result<T>, usize)
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        observe(Attempt::Started { attempt });
        match f(attempt).await {
            Ok(value) => return (Ok(value), attempt),
            Err(e) => {
                let allowed = policy.retries_for(&e, max_retries);
                if attempt > allowed {
                    tracing::error!(task = %task_id, attempt, error = %e, "Task failed");
                    return (Err(e), attempt);
                }
                let delay = backoff.delay_for_attempt(attempt - 1);
                tracing::warn!(
                    task = %task_id,
                    attempt,
                    delay_ms = %delay.as_millis(),
                    error = %e,
                    "Attempt failed, retrying"
                );
                observe(Attempt::Retrying {
                    attempt,
                    delay,
                    error: &e,
                });
                tokio::time::sleep(delay).await;
            }
        }
    }
}
