use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified failure reported by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The worker never performed the interaction.
    NotPerformed,
    /// The target post or profile no longer exists.
    TargetGone,
    /// The target account went private and cannot be checked.
    TargetPrivate,
    /// Instagram throttled the check.
    RateLimited,
    /// Transport trouble that may clear up.
    Transient(String),
    Other(String),
}

impl FailureReason {
    /// Whether the failure is on the worker rather than the target.
    pub fn is_worker_fault(&self) -> bool {
        matches!(self, FailureReason::NotPerformed)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NotPerformed => write!(f, "not_performed"),
            FailureReason::TargetGone => write!(f, "target_gone"),
            FailureReason::TargetPrivate => write!(f, "target_private"),
            FailureReason::RateLimited => write!(f, "rate_limited"),
            FailureReason::Transient(detail) => write!(f, "transient: {}", detail),
            FailureReason::Other(detail) => write!(f, "{}", detail),
        }
    }
}

/// Outcome of checking one interaction against Instagram.
///
/// `terminal = true` means "do not retry". Classified failures are values;
/// an `Err` from the adapter is transport-level breakage and rolls the
/// caller back without touching task state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub terminal: bool,
    pub reason: Option<FailureReason>,
}

impl ValidationOutcome {
    pub fn success() -> Self {
        Self {
            ok: true,
            terminal: false,
            reason: None,
        }
    }

    pub fn retryable(reason: FailureReason) -> Self {
        Self {
            ok: false,
            terminal: false,
            reason: Some(reason),
        }
    }

    pub fn terminal(reason: FailureReason) -> Self {
        Self {
            ok: false,
            terminal: true,
            reason: Some(reason),
        }
    }

    pub fn reason_text(&self) -> String {
        self.reason
            .as_ref()
            .map(|reason| reason.to_string())
            .unwrap_or_default()
    }
}

/// Capability boundary to Instagram. The engine treats it as an oracle;
/// wiring decides whether it talks to the real site or a test double.
#[async_trait]
pub trait InstagramAdapter: Send + Sync {
    async fn validate_like(&self, handle: &str, post_url: &str) -> Result<ValidationOutcome>;

    async fn validate_follow(&self, handle: &str, profile_url: &str)
        -> Result<ValidationOutcome>;

    async fn validate_comment(
        &self,
        handle: &str,
        post_url: &str,
        required_text: &str,
    ) -> Result<ValidationOutcome>;
}

/// Test doubles that replace the adapter wholesale.
pub mod fakes {
    use super::*;
    use crate::error::EngineError;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// Approves every validation.
    pub struct AlwaysOkAdapter;

    #[async_trait]
    impl InstagramAdapter for AlwaysOkAdapter {
        async fn validate_like(&self, _handle: &str, _post_url: &str) -> Result<ValidationOutcome> {
            Ok(ValidationOutcome::success())
        }

        async fn validate_follow(
            &self,
            _handle: &str,
            _profile_url: &str,
        ) -> Result<ValidationOutcome> {
            Ok(ValidationOutcome::success())
        }

        async fn validate_comment(
            &self,
            _handle: &str,
            _post_url: &str,
            _required_text: &str,
        ) -> Result<ValidationOutcome> {
            Ok(ValidationOutcome::success())
        }
    }

    /// Replays a scripted FIFO of outcomes, falling back to a fixed outcome
    /// once the script runs dry.
    pub struct ScriptedAdapter {
        script: Mutex<VecDeque<ValidationOutcome>>,
        fallback: ValidationOutcome,
    }

    impl Default for ScriptedAdapter {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ScriptedAdapter {
        pub fn new() -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback: ValidationOutcome::success(),
            }
        }

        pub fn with_fallback(mut self, fallback: ValidationOutcome) -> Self {
            self.fallback = fallback;
            self
        }

        pub async fn push(&self, outcome: ValidationOutcome) {
            self.script.lock().await.push_back(outcome);
        }

        async fn next(&self) -> ValidationOutcome {
            self.script
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        }
    }

    #[async_trait]
    impl InstagramAdapter for ScriptedAdapter {
        async fn validate_like(&self, _handle: &str, _post_url: &str) -> Result<ValidationOutcome> {
            Ok(self.next().await)
        }

        async fn validate_follow(
            &self,
            _handle: &str,
            _profile_url: &str,
        ) -> Result<ValidationOutcome> {
            Ok(self.next().await)
        }

        async fn validate_comment(
            &self,
            _handle: &str,
            _post_url: &str,
            _required_text: &str,
        ) -> Result<ValidationOutcome> {
            Ok(self.next().await)
        }
    }

    /// Transport is down; every call errors.
    pub struct FailingAdapter;

    #[async_trait]
    impl InstagramAdapter for FailingAdapter {
        async fn validate_like(&self, _handle: &str, _post_url: &str) -> Result<ValidationOutcome> {
            Err(EngineError::StorageUnavailable(
                "instagram adapter unreachable".to_string(),
            ))
        }

        async fn validate_follow(
            &self,
            _handle: &str,
            _profile_url: &str,
        ) -> Result<ValidationOutcome> {
            Err(EngineError::StorageUnavailable(
                "instagram adapter unreachable".to_string(),
            ))
        }

        async fn validate_comment(
            &self,
            _handle: &str,
            _post_url: &str,
            _required_text: &str,
        ) -> Result<ValidationOutcome> {
            Err(EngineError::StorageUnavailable(
                "instagram adapter unreachable".to_string(),
            ))
        }
    }
}
