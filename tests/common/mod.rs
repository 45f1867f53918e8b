#![allow(dead_code)]

use async_trait::async_trait;
use bulkpay::application::orchestrator::PayoutOrchestrator;
use bulkpay::config::OrchestratorConfig;
use bulkpay::domain::gateway::{
    NewCustomer, NewPaymentMethod, NewTransaction, RateTable, TransactionReceipt,
};
use bulkpay::domain::money::MinorUnits;
use bulkpay::domain::payout::{Payout, PayoutRequest, PayoutStatus, StatusUpdate};
use bulkpay::domain::ports::{BatchNotifier, PaymentGateway, PayoutRepository};
use bulkpay::error::{GatewayError, NotifyError, PayoutError, Result};
use bulkpay::infrastructure::in_memory::InMemoryPayoutRepository;
use bulkpay::infrastructure::sandbox::SandboxGateway;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BATCH_REFERENCE: &str = "ACME-2024-06";

/// A payout the sandbox accepts end to end.
pub fn payout(batch_id: &str, name: &str, email: &str, account: &str) -> Payout {
    Payout::from_request(
        batch_id,
        BATCH_REFERENCE,
        PayoutRequest {
            recipient_name: name.to_string(),
            recipient_phone: "+2348000000000".to_string(),
            recipient_email: email.to_string(),
            country_code: "NG".to_string(),
            bank_code: Some("033".to_string()),
            account_number: Some(account.to_string()),
            bank_name: Some("UBA".to_string()),
            amount: MinorUnits::new(500000).unwrap(),
            currency: "NGN".to_string(),
            ..Default::default()
        },
    )
}

/// `count` valid payouts with distinct recipients.
pub fn payouts(batch_id: &str, count: usize) -> Vec<Payout> {
    (0..count)
        .map(|i| {
            payout(
                batch_id,
                &format!("Recipient {}", i),
                &format!("recipient{}@example.com", i),
                &format!("20000{:05}", i),
            )
        })
        .collect()
}

pub struct Harness {
    pub orchestrator: PayoutOrchestrator,
    pub repository: Arc<InMemoryPayoutRepository>,
    pub gateway: Arc<SandboxGateway>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness(gateway: SandboxGateway, concurrency_limit: usize) -> Harness {
    let repository = Arc::new(InMemoryPayoutRepository::new());
    let gateway = Arc::new(gateway);
    let notifier = Arc::new(RecordingNotifier::default());
    let orchestrator = PayoutOrchestrator::builder(
        repository.clone(),
        gateway.clone(),
        notifier.clone(),
    )
    .config(OrchestratorConfig {
        concurrency_limit,
        ..OrchestratorConfig::default()
    })
    .build()
    .unwrap();

    Harness {
        orchestrator,
        repository,
        gateway,
        notifier,
    }
}

/// Polls `check` every 10ms until it holds or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub batch_id: String,
    pub payouts: Vec<Payout>,
}

/// Records every delivered notification, optionally after a delay.
#[derive(Default)]
pub struct RecordingNotifier {
    delay: Duration,
    delivered: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchNotifier for RecordingNotifier {
    async fn notify_batch_completion(
        &self,
        batch_id: &str,
        payouts: &[Payout],
    ) -> std::result::Result<(), NotifyError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.delivered.lock().unwrap().push(Notification {
            batch_id: batch_id.to_string(),
            payouts: payouts.to_vec(),
        });
        Ok(())
    }
}

/// Always answers with a non-success status.
pub struct FailingNotifier {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl BatchNotifier for FailingNotifier {
    async fn notify_batch_completion(
        &self,
        _batch_id: &str,
        _payouts: &[Payout],
    ) -> std::result::Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(NotifyError::Status(500))
    }
}

/// Refuses every write.
pub struct FailingRepository;

#[async_trait]
impl PayoutRepository for FailingRepository {
    async fn save_payout(&self, _payout: Payout) -> Result<()> {
        Err(PayoutError::Storage("disk full".to_string()))
    }

    async fn get_payout(&self, id: &str) -> Result<Payout> {
        Err(PayoutError::NotFound(format!("payout {}", id)))
    }

    async fn update_payout_status(&self, _id: &str, _update: StatusUpdate) -> Result<()> {
        Err(PayoutError::Storage("disk full".to_string()))
    }

    async fn list_payouts(&self, _limit: usize) -> Result<Vec<Payout>> {
        Ok(Vec::new())
    }

    async fn list_payouts_by_batch_id(&self, batch_id: &str) -> Result<Vec<Payout>> {
        Err(PayoutError::NotFound(format!("batch {}", batch_id)))
    }

    async fn list_payouts_by_status(&self, _statuses: &[PayoutStatus]) -> Result<Vec<Payout>> {
        Ok(Vec::new())
    }
}

/// Stores payouts normally but can never record a status change.
#[derive(Default)]
pub struct StatusWriteFailingRepository {
    pub inner: InMemoryPayoutRepository,
    pub failed_writes: AtomicUsize,
}

#[async_trait]
impl PayoutRepository for StatusWriteFailingRepository {
    async fn save_payout(&self, payout: Payout) -> Result<()> {
        self.inner.save_payout(payout).await
    }

    async fn get_payout(&self, id: &str) -> Result<Payout> {
        self.inner.get_payout(id).await
    }

    async fn update_payout_status(&self, _id: &str, _update: StatusUpdate) -> Result<()> {
        self.failed_writes.fetch_add(1, Ordering::SeqCst);
        Err(PayoutError::Storage("disk full".to_string()))
    }

    async fn list_payouts(&self, limit: usize) -> Result<Vec<Payout>> {
        self.inner.list_payouts(limit).await
    }

    async fn list_payouts_by_batch_id(&self, batch_id: &str) -> Result<Vec<Payout>> {
        self.inner.list_payouts_by_batch_id(batch_id).await
    }

    async fn list_payouts_by_status(&self, statuses: &[PayoutStatus]) -> Result<Vec<Payout>> {
        self.inner.list_payouts_by_status(statuses).await
    }
}

/// Delegates to a sandbox after a random delay, so workers finish out of order.
pub struct JitteredGateway {
    pub inner: Arc<SandboxGateway>,
    pub max_delay_ms: u64,
}

impl JitteredGateway {
    async fn jitter(&self) {
        let delay = rand::thread_rng().gen_range(0..=self.max_delay_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}

#[async_trait]
impl PaymentGateway for JitteredGateway {
    async fn find_customer_by_email(&self, email: &str) -> std::result::Result<String, GatewayError> {
        self.jitter().await;
        self.inner.find_customer_by_email(email).await
    }

    async fn create_customer(
        &self,
        customer: NewCustomer,
    ) -> std::result::Result<String, GatewayError> {
        self.jitter().await;
        self.inner.create_customer(customer).await
    }

    async fn find_payment_method(
        &self,
        customer_id: &str,
        account_number: &str,
    ) -> std::result::Result<String, GatewayError> {
        self.jitter().await;
        self.inner
            .find_payment_method(customer_id, account_number)
            .await
    }

    async fn create_payment_method(
        &self,
        method: NewPaymentMethod,
    ) -> std::result::Result<String, GatewayError> {
        self.jitter().await;
        self.inner.create_payment_method(method).await
    }

    async fn create_transaction(
        &self,
        transaction: NewTransaction,
    ) -> std::result::Result<TransactionReceipt, GatewayError> {
        self.jitter().await;
        self.inner.create_transaction(transaction).await
    }

    async fn get_rates(
        &self,
        base: &str,
        symbols: &[String],
    ) -> std::result::Result<RateTable, GatewayError> {
        self.inner.get_rates(base, symbols).await
    }
}

/// Panics when asked to pay the given account, otherwise delegates.
pub struct PanickingGateway {
    pub inner: Arc<SandboxGateway>,
    pub poisoned_account: String,
}

#[async_trait]
impl PaymentGateway for PanickingGateway {
    async fn find_customer_by_email(&self, email: &str) -> std::result::Result<String, GatewayError> {
        self.inner.find_customer_by_email(email).await
    }

    async fn create_customer(
        &self,
        customer: NewCustomer,
    ) -> std::result::Result<String, GatewayError> {
        self.inner.create_customer(customer).await
    }

    async fn find_payment_method(
        &self,
        customer_id: &str,
        account_number: &str,
    ) -> std::result::Result<String, GatewayError> {
        if account_number == self.poisoned_account {
            panic!("rail client crashed");
        }
        self.inner
            .find_payment_method(customer_id, account_number)
            .await
    }

    async fn create_payment_method(
        &self,
        method: NewPaymentMethod,
    ) -> std::result::Result<String, GatewayError> {
        self.inner.create_payment_method(method).await
    }

    async fn create_transaction(
        &self,
        transaction: NewTransaction,
    ) -> std::result::Result<TransactionReceipt, GatewayError> {
        self.inner.create_transaction(transaction).await
    }

    async fn get_rates(
        &self,
        base: &str,
        symbols: &[String],
    ) -> std::result::Result<RateTable, GatewayError> {
        self.inner.get_rates(base, symbols).await
    }
}
