//! The per-payout state machine.
//!
//! A payout moves `PENDING → PROCESSING` and then through three gateway steps,
//! each guarded by a resolve-or-create policy except the last:
//!
//! 1. customer resolution (by e-mail),
//! 2. payment-method resolution (by customer and account number),
//! 3. transaction creation, keyed by the payout reference for idempotency.
//!
//! Any step error ends the payout in `FAILED` with a `"<step>: <error>"`
//! message. A shutdown observed mid-step leaves it in `PROCESSING` so it can be
//! resumed later.

use super::locks::KeyedLocks;
use super::shutdown::Shutdown;
use crate::config::OrchestratorConfig;
use crate::domain::gateway::{
    Channel, Institution, NewCustomer, NewPaymentMethod, NewTransaction, TransactionReceipt,
};
use crate::domain::payout::{Payout, PayoutStatus, StatusUpdate};
use crate::domain::ports::{PaymentGatewayRef, PayoutRepositoryRef};
use crate::error::GatewayError;
use std::collections::BTreeMap;
use std::future::Future;
use tracing::{debug, error, info, instrument, warn};

pub const STEP_RESOLVE_CUSTOMER: &str = "Failed to resolve customer";
pub const STEP_CREATE_CUSTOMER: &str = "Failed to create customer";
pub const STEP_RESOLVE_PAYMENT_METHOD: &str = "Failed to resolve payment method";
pub const STEP_LINK_BANK_ACCOUNT: &str = "Failed to link bank account";
pub const STEP_TRANSACTION: &str = "Transaction failed";

/// How a single workflow run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowOutcome {
    Succeeded { transaction_id: String },
    Failed { message: String },
    /// Shutdown was observed; the payout stays in `PROCESSING`.
    Interrupted,
    /// The payout was already terminal and was left untouched.
    Skipped,
}

#[derive(Debug)]
enum StepError {
    Gateway(GatewayError),
    Invalid(String),
    Cancelled,
}

#[derive(Debug)]
enum Failure {
    Terminal(String),
    Cancelled,
}

impl StepError {
    fn labelled(self, label: &str) -> Failure {
        match self {
            Self::Gateway(err) => Failure::Terminal(format!("{}: {}", label, err)),
            Self::Invalid(msg) => Failure::Terminal(format!("{}: {}", label, msg)),
            Self::Cancelled => Failure::Cancelled,
        }
    }
}

/// Races a gateway call against shutdown.
async fn guarded<T, F>(shutdown: &mut Shutdown, call: F) -> Result<T, StepError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    tokio::select! {
        biased;
        _ = shutdown.triggered() => Err(StepError::Cancelled),
        result = call => result.map_err(StepError::Gateway),
    }
}

pub struct PayoutWorkflow {
    repository: PayoutRepositoryRef,
    gateway: PaymentGatewayRef,
    config: OrchestratorConfig,
    customer_locks: KeyedLocks,
    payment_method_locks: KeyedLocks,
}

impl PayoutWorkflow {
    pub fn new(
        repository: PayoutRepositoryRef,
        gateway: PaymentGatewayRef,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            repository,
            gateway,
            config,
            customer_locks: KeyedLocks::new(),
            payment_method_locks: KeyedLocks::new(),
        }
    }

    /// Drives one payout to a terminal status and records it.
    #[instrument(
        name = "payout",
        skip_all,
        fields(payout_id = %payout.id, batch_id = %payout.batch_id)
    )]
    pub async fn run(&self, payout: &Payout, shutdown: &mut Shutdown) -> WorkflowOutcome {
        match payout.status {
            PayoutStatus::Success | PayoutStatus::Failed => return WorkflowOutcome::Skipped,
            PayoutStatus::Pending => self.record(&payout.id, StatusUpdate::processing()).await,
            PayoutStatus::Processing => debug!("resuming payout already in PROCESSING"),
        }

        match self.transfer(payout, shutdown).await {
            Ok(receipt) => {
                info!(
                    transaction_id = %receipt.transaction_id,
                    gateway_status = %receipt.status,
                    "payout paid"
                );
                self.record(&payout.id, StatusUpdate::success(&receipt.transaction_id))
                    .await;
                WorkflowOutcome::Succeeded {
                    transaction_id: receipt.transaction_id,
                }
            }
            Err(Failure::Terminal(message)) => {
                error!(error = %message, "payout failed");
                self.record(&payout.id, StatusUpdate::failed(&message)).await;
                WorkflowOutcome::Failed { message }
            }
            Err(Failure::Cancelled) => {
                warn!("payout interrupted by shutdown, left in PROCESSING");
                WorkflowOutcome::Interrupted
            }
        }
    }

    /// Marks a payout whose worker never reported back as failed.
    pub async fn record_failure(&self, payout_id: &str, message: String) {
        self.record(payout_id, StatusUpdate::failed(message)).await;
    }

    async fn transfer(
        &self,
        payout: &Payout,
        shutdown: &mut Shutdown,
    ) -> Result<TransactionReceipt, Failure> {
        let customer_id = self.resolve_customer(payout, shutdown).await?;
        let payment_method_id = self
            .resolve_payment_method(payout, &customer_id, shutdown)
            .await?;

        let transaction = NewTransaction {
            customer_id,
            payment_method_id,
            source_currency: self.config.source_currency.clone(),
            destination_currency: payout.currency.clone(),
            destination_amount: payout.amount.to_major_string(),
            idempotency_key: payout.reference_id.clone(),
            meta: BTreeMap::from([
                (
                    "narration".to_string(),
                    format!("{} - {}", self.config.narration_prefix, payout.batch_id),
                ),
                ("reference".to_string(), payout.reference_id.clone()),
            ]),
        };
        guarded(shutdown, self.gateway.create_transaction(transaction))
            .await
            .map_err(|e| e.labelled(STEP_TRANSACTION))
    }

    async fn resolve_customer(
        &self,
        payout: &Payout,
        shutdown: &mut Shutdown,
    ) -> Result<String, Failure> {
        let email = self.customer_email(payout);
        let _guard = self.customer_locks.lock(&email).await;

        match guarded(shutdown, self.gateway.find_customer_by_email(&email)).await {
            Ok(customer_id) => {
                debug!(%customer_id, "reusing existing customer");
                Ok(customer_id)
            }
            Err(StepError::Gateway(err)) if err.is_not_found() => {
                let customer = NewCustomer {
                    full_name: payout.recipient_name.clone(),
                    email,
                    phone: payout.recipient_phone.clone(),
                    country_code: payout.country_code.clone(),
                };
                let customer_id = guarded(shutdown, self.gateway.create_customer(customer))
                    .await
                    .map_err(|e| e.labelled(STEP_CREATE_CUSTOMER))?;
                debug!(%customer_id, "created customer");
                Ok(customer_id)
            }
            Err(err) => Err(err.labelled(STEP_RESOLVE_CUSTOMER)),
        }
    }

    async fn resolve_payment_method(
        &self,
        payout: &Payout,
        customer_id: &str,
        shutdown: &mut Shutdown,
    ) -> Result<String, Failure> {
        let account_number = payout
            .account_number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                StepError::Invalid("payout has no destination account number".to_string())
                    .labelled(STEP_LINK_BANK_ACCOUNT)
            })?;

        let key = format!("{}:{}", customer_id, account_number);
        let _guard = self.payment_method_locks.lock(&key).await;

        match guarded(
            shutdown,
            self.gateway.find_payment_method(customer_id, account_number),
        )
        .await
        {
            Ok(payment_method_id) => {
                debug!(%payment_method_id, "reusing existing payment method");
                Ok(payment_method_id)
            }
            Err(StepError::Gateway(err)) if err.is_not_found() => {
                let method = NewPaymentMethod {
                    channel: Channel::BankAccount,
                    customer_id: customer_id.to_string(),
                    account_name: payout.recipient_name.clone(),
                    account_number: account_number.to_string(),
                    country_code: payout.country_code.clone(),
                    institution: Institution {
                        institution_code: payout.bank_code.clone(),
                        institution_name: payout.bank_name.clone(),
                    },
                };
                let payment_method_id =
                    guarded(shutdown, self.gateway.create_payment_method(method))
                        .await
                        .map_err(|e| e.labelled(STEP_LINK_BANK_ACCOUNT))?;
                debug!(%payment_method_id, "linked bank account");
                Ok(payment_method_id)
            }
            Err(err) => Err(err.labelled(STEP_RESOLVE_PAYMENT_METHOD)),
        }
    }

    /// The address the customer is looked up and created under.
    ///
    /// Falls back to `temp_<wallet tag>@<domain>` (or the reference id when the
    /// tag is empty) when the recipient has no usable address.
    pub fn customer_email(&self, payout: &Payout) -> String {
        let email = payout.recipient_email.trim();
        if email.contains('@') {
            return email.to_ascii_lowercase();
        }
        let tag = payout
            .recipient_tag
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&payout.reference_id);
        format!(
            "temp_{}@{}",
            tag.to_ascii_lowercase(),
            self.config.synthetic_email_domain
        )
    }

    async fn record(&self, payout_id: &str, update: StatusUpdate) {
        let status = update.status;
        if let Err(e) = self.repository.update_payout_status(payout_id, update).await {
            warn!(payout_id, %status, error = %e, "failed to record payout status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::shutdown::ShutdownSignal;
    use crate::domain::money::MinorUnits;
    use crate::domain::payout::PayoutRequest;
    use crate::domain::ports::PayoutRepository;
    use crate::infrastructure::in_memory::InMemoryPayoutRepository;
    use crate::infrastructure::sandbox::{Fault, SandboxGateway};
    use std::sync::Arc;

    fn payout(email: &str, account: Option<&str>) -> Payout {
        Payout::from_request(
            "batch-1",
            "JAN",
            PayoutRequest {
                recipient_name: "Ada Obi".to_string(),
                recipient_phone: "+2348000000000".to_string(),
                recipient_email: email.to_string(),
                recipient_tag: Some("ada".to_string()),
                country_code: "NG".to_string(),
                bank_code: Some("033".to_string()),
                account_number: account.map(str::to_string),
                bank_name: Some("United Bank for Africa".to_string()),
                amount: MinorUnits::new(500000).unwrap(),
                currency: "NGN".to_string(),
            },
        )
    }

    async fn setup(
        gateway: SandboxGateway,
        payouts: &[Payout],
    ) -> (PayoutWorkflow, Arc<InMemoryPayoutRepository>, Arc<SandboxGateway>) {
        let repository = Arc::new(InMemoryPayoutRepository::new());
        for p in payouts {
            repository.save_payout(p.clone()).await.unwrap();
        }
        let gateway = Arc::new(gateway);
        let workflow = PayoutWorkflow::new(
            repository.clone(),
            gateway.clone(),
            OrchestratorConfig::default(),
        );
        (workflow, repository, gateway)
    }

    #[tokio::test]
    async fn test_happy_path_records_transaction() {
        let p = payout("ada@example.com", Some("2000012345"));
        let (workflow, repository, gateway) = setup(SandboxGateway::new(), &[p.clone()]).await;
        let mut shutdown = ShutdownSignal::new().subscribe();

        let outcome = workflow.run(&p, &mut shutdown).await;

        let stored = repository.get_payout(&p.id).await.unwrap();
        assert_eq!(stored.status, PayoutStatus::Success);
        assert!(matches!(outcome, WorkflowOutcome::Succeeded { .. }));
        let recorded = gateway.transactions();
        assert_eq!(recorded.len(), 1);
        assert_eq!(stored.transaction_id, Some(recorded[0].transaction_id.clone()));

        let submitted = &recorded[0].request;
        assert_eq!(submitted.destination_amount, "5000.00");
        assert_eq!(submitted.source_currency, "USD");
        assert_eq!(submitted.destination_currency, "NGN");
        assert_eq!(submitted.idempotency_key, p.reference_id);
        assert_eq!(
            submitted.meta.get("narration").map(String::as_str),
            Some("Bulk payout - batch-1")
        );
    }

    #[tokio::test]
    async fn test_lookup_error_is_fatal_without_creation() {
        let p = payout("ada@example.com", Some("2000012345"));
        let gateway = SandboxGateway::new().with_fault(Fault::CustomerLookup, "ada@example.com");
        let (workflow, repository, gateway) = setup(gateway, &[p.clone()]).await;
        let mut shutdown = ShutdownSignal::new().subscribe();

        workflow.run(&p, &mut shutdown).await;

        let stored = repository.get_payout(&p.id).await.unwrap();
        assert_eq!(stored.status, PayoutStatus::Failed);
        assert!(
            stored
                .error_message
                .unwrap()
                .starts_with("Failed to resolve customer: ")
        );
        assert_eq!(gateway.stats().customers_created, 0);
    }

    #[tokio::test]
    async fn test_missing_account_number_fails_at_linking() {
        let p = payout("ada@example.com", None);
        let (workflow, repository, gateway) = setup(SandboxGateway::new(), &[p.clone()]).await;
        let mut shutdown = ShutdownSignal::new().subscribe();

        workflow.run(&p, &mut shutdown).await;

        let stored = repository.get_payout(&p.id).await.unwrap();
        assert_eq!(
            stored.error_message.as_deref(),
            Some("Failed to link bank account: payout has no destination account number")
        );
        assert_eq!(gateway.stats().transactions_created, 0);
    }

    #[tokio::test]
    async fn test_terminal_payouts_are_skipped() {
        let mut p = payout("ada@example.com", Some("2000012345"));
        p.status = PayoutStatus::Failed;
        let (workflow, _repository, gateway) = setup(SandboxGateway::new(), &[p.clone()]).await;
        let mut shutdown = ShutdownSignal::new().subscribe();

        assert_eq!(workflow.run(&p, &mut shutdown).await, WorkflowOutcome::Skipped);
        assert_eq!(gateway.stats().customers_created, 0);
    }

    #[tokio::test]
    async fn test_shutdown_leaves_payout_processing() {
        let p = payout("ada@example.com", Some("2000012345"));
        let (workflow, repository, _gateway) = setup(SandboxGateway::new(), &[p.clone()]).await;
        let signal = ShutdownSignal::new();
        signal.trigger();
        let mut shutdown = signal.subscribe();

        assert_eq!(
            workflow.run(&p, &mut shutdown).await,
            WorkflowOutcome::Interrupted
        );
        let stored = repository.get_payout(&p.id).await.unwrap();
        assert_eq!(stored.status, PayoutStatus::Processing);
    }

    #[tokio::test]
    async fn test_synthetic_email_from_wallet_tag() {
        let (workflow, _, _) = setup(SandboxGateway::new(), &[]).await;

        let mut p = payout("", Some("2000012345"));
        assert_eq!(workflow.customer_email(&p), "temp_ada@bulkpay.local");

        p.recipient_tag = None;
        assert_eq!(
            workflow.customer_email(&p),
            format!("temp_{}@bulkpay.local", p.reference_id.to_ascii_lowercase())
        );

        p.recipient_email = " Ada@Example.com ".to_string();
        assert_eq!(workflow.customer_email(&p), "ada@example.com");
    }
}
