use crate::error::{PayoutError, Result};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const DEFAULT_CONCURRENCY_LIMIT: usize = 10;
pub const DEFAULT_NOTIFY_IN_FLIGHT: usize = 4;
pub const DEFAULT_SOURCE_CURRENCY: &str = "USD";
pub const DEFAULT_NARRATION_PREFIX: &str = "Bulk payout";
pub const DEFAULT_SYNTHETIC_EMAIL_DOMAIN: &str = "bulkpay.local";
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables of the orchestration engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Size of the admission gate shared by every batch the engine runs.
    pub concurrency_limit: usize,
    /// Currency the payouts are funded from.
    pub source_currency: String,
    /// Prefix of the narration attached to every transaction.
    pub narration_prefix: String,
    /// Domain used when a recipient has no usable e-mail address.
    pub synthetic_email_domain: String,
    /// Upper bound on notification deliveries running at once.
    pub notify_in_flight: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            source_currency: DEFAULT_SOURCE_CURRENCY.to_string(),
            narration_prefix: DEFAULT_NARRATION_PREFIX.to_string(),
            synthetic_email_domain: DEFAULT_SYNTHETIC_EMAIL_DOMAIN.to_string(),
            notify_in_flight: DEFAULT_NOTIFY_IN_FLIGHT,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(PayoutError::Validation(
                "concurrency limit must be at least 1".to_string(),
            ));
        }
        if self.notify_in_flight == 0 {
            return Err(PayoutError::Validation(
                "notification in-flight limit must be at least 1".to_string(),
            ));
        }
        if self.concurrency_limit > Semaphore::MAX_PERMITS {
            return Err(PayoutError::Validation(format!(
                "concurrency limit must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.notify_in_flight > Semaphore::MAX_PERMITS {
            return Err(PayoutError::Validation(format!(
                "notification in-flight limit must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.source_currency.trim().is_empty() {
            return Err(PayoutError::Validation(
                "source currency must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where and how batch completion webhooks are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: DEFAULT_WEBHOOK_TIMEOUT,
        }
    }
}
