use std::{sync::Arc, time::Duration};

use log::{info, warn};
use rand::Rng;

use super::backend::LanguageModel;
use super::error::{BackendError, QueryError};
use crate::models::AssembledPrompt;
use crate::settings::BackendConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Backoff before retry number `attempt` (zero-based): exponential,
    /// capped, with jitter in the upper half.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max);
        let ceiling = exp.as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        let jittered = rand::thread_rng().gen_range(ceiling / 2..=ceiling);
        Duration::from_millis(jittered)
    }
}

/// Sends assembled prompts to the language model with a per-attempt
/// timeout and bounded retries on transient failures.
pub struct AnswerDispatcher {
    model: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
}

impl AnswerDispatcher {
    pub fn new(model: Arc<dyn LanguageModel>, retry: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            model,
            retry,
            attempt_timeout,
        }
    }

    pub fn from_config(model: Arc<dyn LanguageModel>, config: &BackendConfig) -> Self {
        Self::new(model, RetryPolicy::from_config(config), config.request_timeout())
    }

    pub async fn dispatch(&self, prompt: &AssembledPrompt, session_token: &str) -> Result<String, QueryError> {
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(
                self.attempt_timeout,
                self.model.complete(prompt, session_token),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(BackendError::Transient(format!(
                    "no answer within {}ms",
                    self.attempt_timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(text) => {
                    info!(
                        "request {} answered after {} attempt(s)",
                        prompt.request_id,
                        attempt + 1
                    );
                    return Ok(text);
                }
                Err(BackendError::Unauthorized) => return Err(QueryError::Unauthorized),
                Err(BackendError::Rejected { status, message }) => {
                    warn!("request {} rejected by backend ({status})", prompt.request_id);
                    return Err(QueryError::Rejected(message));
                }
                Err(BackendError::Transient(reason)) => {
                    if attempt >= self.retry.max_retries {
                        warn!(
                            "request {} failed after {} attempt(s): {reason}",
                            prompt.request_id,
                            attempt + 1
                        );
                        return Err(QueryError::Unavailable(reason));
                    }
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "request {} attempt {}/{} failed ({reason}), retrying in {}ms",
                        prompt.request_id,
                        attempt + 1,
                        self.retry.max_retries + 1,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, BackendError>>>,
        calls: AtomicU32,
        stall: Option<Duration>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<String, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
                stall: None,
            })
        }

        fn stalling(stall: Duration) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(VecDeque::new()),
                calls: AtomicU32::new(0),
                stall: Some(stall),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, _prompt: &AssembledPrompt, _token: &str) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::Transient("script exhausted".into())))
        }
    }

    fn prompt() -> AssembledPrompt {
        AssembledPrompt {
            request_id: uuid::Uuid::new_v4(),
            question: "what is due?".into(),
            context_excerpt: "invoice due Friday".into(),
            asked_at: Utc::now(),
            fragments_used: 1,
        }
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base: Duration::from_millis(1),
            max: Duration::from_millis(4),
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base: Duration::from_millis(100),
            max: Duration::from_millis(300),
        };
        let first = policy.delay_for(0);
        assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(100));
        let third = policy.delay_for(2);
        assert!(third >= Duration::from_millis(150) && third <= Duration::from_millis(300));
        assert!(policy.delay_for(30) <= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let model = ScriptedModel::new(vec![
            Err(BackendError::Transient("502".into())),
            Ok("Friday".into()),
        ]);
        let dispatcher = AnswerDispatcher::new(model.clone(), fast_retry(2), Duration::from_secs(1));

        assert_eq!(dispatcher.dispatch(&prompt(), "tok").await.unwrap(), "Friday");
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let model = ScriptedModel::new(vec![]);
        let dispatcher = AnswerDispatcher::new(model.clone(), fast_retry(2), Duration::from_secs(1));

        let err = dispatcher.dispatch(&prompt(), "tok").await.unwrap_err();
        assert!(matches!(err, QueryError::Unavailable(_)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let model = ScriptedModel::new(vec![Err(BackendError::Unauthorized), Ok("late".into())]);
        let dispatcher = AnswerDispatcher::new(model.clone(), fast_retry(3), Duration::from_secs(1));

        assert_eq!(
            dispatcher.dispatch(&prompt(), "tok").await.unwrap_err(),
            QueryError::Unauthorized
        );
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejection_is_surfaced_verbatim() {
        let model = ScriptedModel::new(vec![Err(BackendError::Rejected {
            status: 429,
            message: "You've reached your daily query limit".into(),
        })]);
        let dispatcher = AnswerDispatcher::new(model.clone(), fast_retry(3), Duration::from_secs(1));

        assert_eq!(
            dispatcher.dispatch(&prompt(), "tok").await.unwrap_err(),
            QueryError::Rejected("You've reached your daily query limit".into())
        );
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_backend_times_out_per_attempt() {
        let model = ScriptedModel::stalling(Duration::from_secs(5));
        let dispatcher = AnswerDispatcher::new(model.clone(), fast_retry(1), Duration::from_millis(20));

        let err = dispatcher.dispatch(&prompt(), "tok").await.unwrap_err();
        assert!(matches!(err, QueryError::Unavailable(reason) if reason.contains("no answer within")));
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }
}
