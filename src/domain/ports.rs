use super::gateway::{NewCustomer, NewPaymentMethod, NewTransaction, RateTable, TransactionReceipt};
use super::payout::{Payout, PayoutStatus, StatusUpdate};
use crate::error::{GatewayError, NotifyError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Persistence contract for payouts.
///
/// Implementations must tolerate concurrent writes to distinct payouts and
/// make the last committed write visible to subsequent reads. Nothing more is
/// assumed about their locking or transactions.
#[async_trait]
pub trait PayoutRepository: Send + Sync {
    /// Inserts a new payout. Fails with `Validation` if the id is already stored.
    async fn save_payout(&self, payout: Payout) -> Result<()>;
    async fn get_payout(&self, id: &str) -> Result<Payout>;
    async fn update_payout_status(&self, id: &str, update: StatusUpdate) -> Result<()>;
    /// Most recent first.
    async fn list_payouts(&self, limit: usize) -> Result<Vec<Payout>>;
    /// Fails with `NotFound` when the batch has no payouts.
    async fn list_payouts_by_batch_id(&self, batch_id: &str) -> Result<Vec<Payout>>;
    async fn list_payouts_by_status(&self, statuses: &[PayoutStatus]) -> Result<Vec<Payout>>;
}

/// Contract of the external payment rail.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn find_customer_by_email(&self, email: &str) -> std::result::Result<String, GatewayError>;
    async fn create_customer(&self, customer: NewCustomer) -> std::result::Result<String, GatewayError>;
    async fn find_payment_method(
        &self,
        customer_id: &str,
        account_number: &str,
    ) -> std::result::Result<String, GatewayError>;
    async fn create_payment_method(
        &self,
        method: NewPaymentMethod,
    ) -> std::result::Result<String, GatewayError>;
    async fn create_transaction(
        &self,
        transaction: NewTransaction,
    ) -> std::result::Result<TransactionReceipt, GatewayError>;
    async fn get_rates(
        &self,
        base: &str,
        symbols: &[String],
    ) -> std::result::Result<RateTable, GatewayError>;
}

/// Delivers the final state of a batch to the client system.
#[async_trait]
pub trait BatchNotifier: Send + Sync {
    async fn notify_batch_completion(
        &self,
        batch_id: &str,
        payouts: &[Payout],
    ) -> std::result::Result<(), NotifyError>;
}

pub type PayoutRepositoryRef = Arc<dyn PayoutRepository>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
pub type BatchNotifierRef = Arc<dyn BatchNotifier>;
