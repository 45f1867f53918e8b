//! An in-process simulation of the payment rail.
//!
//! `SandboxGateway` keeps customers, payment methods and transactions in
//! memory and applies a small set of deterministic rules, so the CLI and the
//! tests can exercise the whole workflow without network access:
//!
//! - customers can only be created in supported countries,
//! - bank account numbers must be at least six digits,
//! - the destination currency must be quoted in the rate table,
//! - a repeated idempotency key returns the original transaction.
//!
//! Faults can be injected per step and key, and every call can be slowed down
//! to make concurrency observable.

use crate::domain::gateway::{
    NewCustomer, NewPaymentMethod, NewTransaction, RateTable, TransactionReceipt,
};
use crate::domain::ports::PaymentGateway;
use crate::error::GatewayError;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

const SUPPORTED_COUNTRIES: &[&str] = &["NG", "GH", "KE", "UG", "TZ", "ZA", "US", "GB"];

const USD_RATES: &[(&str, &str)] = &[
    ("USD", "1"),
    ("NGN", "1520.50"),
    ("GHS", "15.20"),
    ("KES", "129.35"),
    ("UGX", "3710.00"),
    ("TZS", "2560.00"),
    ("ZAR", "18.45"),
    ("GBP", "0.79"),
];

/// Which gateway call an injected fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Keyed by e-mail.
    CustomerLookup,
    /// Keyed by e-mail.
    CustomerCreation,
    /// Keyed by account number.
    PaymentMethodLookup,
    /// Keyed by account number.
    PaymentMethodCreation,
    /// Keyed by idempotency key.
    Transaction,
}

/// Matches every key of a fault.
pub const ANY_KEY: &str = "*";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxStats {
    pub calls: usize,
    pub customers_created: usize,
    pub payment_methods_created: usize,
    pub transactions_created: usize,
    pub peak_in_flight: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTransaction {
    pub transaction_id: String,
    pub request: NewTransaction,
}

#[derive(Default)]
struct Ledger {
    customers: HashMap<String, String>,
    payment_methods: HashMap<(String, String), String>,
    transactions: Vec<RecordedTransaction>,
    by_idempotency_key: HashMap<String, usize>,
    stats: SandboxStats,
}

pub struct SandboxGateway {
    ledger: Mutex<Ledger>,
    faults: HashMap<Fault, HashSet<String>>,
    latency: Duration,
    in_flight: AtomicUsize,
}

impl Default for SandboxGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter even when the call future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            faults: HashMap::new(),
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Makes `fault` fail with a rejection for `key` (or every key with [`ANY_KEY`]).
    pub fn with_fault(mut self, fault: Fault, key: impl Into<String>) -> Self {
        self.faults.entry(fault).or_default().insert(key.into());
        self
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Registers a customer that already exists on the rail.
    pub fn with_existing_customer(self, email: &str, customer_id: &str) -> Self {
        self.ledger()
            .customers
            .insert(email.to_string(), customer_id.to_string());
        self
    }

    pub fn stats(&self) -> SandboxStats {
        self.ledger().stats.clone()
    }

    pub fn transactions(&self) -> Vec<RecordedTransaction> {
        self.ledger().transactions.clone()
    }

    pub fn customer_id(&self, email: &str) -> Option<String> {
        self.ledger().customers.get(email).cloned()
    }

    fn ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_fault(&self, fault: Fault, key: &str) -> Result<(), GatewayError> {
        match self.faults.get(&fault) {
            Some(keys) if keys.contains(key) || keys.contains(ANY_KEY) => Err(
                GatewayError::rejected("SANDBOX_FAULT", format!("injected {:?} fault for {}", fault, key)),
            ),
            _ => Ok(()),
        }
    }

    /// Simulates the network round trip and tracks concurrency.
    async fn round_trip(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut ledger = self.ledger();
            ledger.stats.calls += 1;
            ledger.stats.peak_in_flight = ledger.stats.peak_in_flight.max(now);
        }
        let guard = InFlight(&self.in_flight);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        guard
    }

    fn usd_rates() -> BTreeMap<String, Decimal> {
        USD_RATES
            .iter()
            .filter_map(|(code, rate)| Decimal::from_str(rate).ok().map(|r| (code.to_string(), r)))
            .collect()
    }
}

fn short_id(prefix: &str) -> String {
    format!("{}_{}", prefix, &Uuid::new_v4().simple().to_string()[..12])
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    async fn find_customer_by_email(&self, email: &str) -> Result<String, GatewayError> {
        let _call = self.round_trip().await;
        self.check_fault(Fault::CustomerLookup, email)?;
        self.ledger()
            .customers
            .get(email)
            .cloned()
            .ok_or(GatewayError::NotFound)
    }

    async fn create_customer(&self, customer: NewCustomer) -> Result<String, GatewayError> {
        let _call = self.round_trip().await;
        self.check_fault(Fault::CustomerCreation, &customer.email)?;
        if customer.full_name.trim().is_empty() {
            return Err(GatewayError::rejected(
                "INVALID_CUSTOMER",
                "full name is required",
            ));
        }
        if !SUPPORTED_COUNTRIES.contains(&customer.country_code.as_str()) {
            return Err(GatewayError::rejected(
                "UNSUPPORTED_COUNTRY",
                format!("country '{}' is not supported", customer.country_code),
            ));
        }

        let mut ledger = self.ledger();
        if ledger.customers.contains_key(&customer.email) {
            return Err(GatewayError::rejected(
                "DUPLICATE_CUSTOMER",
                format!("customer with email {} already exists", customer.email),
            ));
        }
        let id = short_id("cus");
        ledger.customers.insert(customer.email, id.clone());
        ledger.stats.customers_created += 1;
        Ok(id)
    }

    async fn find_payment_method(
        &self,
        customer_id: &str,
        account_number: &str,
    ) -> Result<String, GatewayError> {
        let _call = self.round_trip().await;
        self.check_fault(Fault::PaymentMethodLookup, account_number)?;
        self.ledger()
            .payment_methods
            .get(&(customer_id.to_string(), account_number.to_string()))
            .cloned()
            .ok_or(GatewayError::NotFound)
    }

    async fn create_payment_method(&self, method: NewPaymentMethod) -> Result<String, GatewayError> {
        let _call = self.round_trip().await;
        self.check_fault(Fault::PaymentMethodCreation, &method.account_number)?;
        if method.account_number.len() < 6
            || !method.account_number.chars().all(|c| c.is_ascii_digit())
        {
            return Err(GatewayError::rejected(
                "INVALID_ACCOUNT",
                format!("account number '{}' is not valid", method.account_number),
            ));
        }

        let mut ledger = self.ledger();
        if !ledger.customers.values().any(|id| *id == method.customer_id) {
            return Err(GatewayError::rejected(
                "UNKNOWN_CUSTOMER",
                format!("customer {} does not exist", method.customer_id),
            ));
        }
        let id = short_id("pm");
        ledger
            .payment_methods
            .insert((method.customer_id, method.account_number), id.clone());
        ledger.stats.payment_methods_created += 1;
        Ok(id)
    }

    async fn create_transaction(
        &self,
        transaction: NewTransaction,
    ) -> Result<TransactionReceipt, GatewayError> {
        let _call = self.round_trip().await;
        self.check_fault(Fault::Transaction, &transaction.idempotency_key)?;

        let amount = Decimal::from_str(&transaction.destination_amount).map_err(|_| {
            GatewayError::rejected(
                "INVALID_AMOUNT",
                format!("'{}' is not a decimal amount", transaction.destination_amount),
            )
        })?;
        if amount.is_sign_negative() || amount.scale() != 2 {
            return Err(GatewayError::rejected(
                "INVALID_AMOUNT",
                format!("'{}' must be a non-negative amount with two decimals", transaction.destination_amount),
            ));
        }
        if !Self::usd_rates().contains_key(&transaction.destination_currency) {
            return Err(GatewayError::rejected(
                "UNSUPPORTED_CURRENCY",
                format!("currency '{}' is not supported", transaction.destination_currency),
            ));
        }

        let mut ledger = self.ledger();
        if let Some(&index) = ledger.by_idempotency_key.get(&transaction.idempotency_key) {
            return Ok(TransactionReceipt {
                transaction_id: ledger.transactions[index].transaction_id.clone(),
                status: "PROCESSING".to_string(),
            });
        }
        let known_destination = ledger.payment_methods.iter().any(|((customer, _), pm)| {
            *customer == transaction.customer_id && *pm == transaction.payment_method_id
        });
        if !known_destination {
            return Err(GatewayError::rejected(
                "UNKNOWN_DESTINATION",
                format!(
                    "payment method {} does not belong to customer {}",
                    transaction.payment_method_id, transaction.customer_id
                ),
            ));
        }

        let transaction_id = short_id("txn");
        let index = ledger.transactions.len();
        ledger
            .by_idempotency_key
            .insert(transaction.idempotency_key.clone(), index);
        ledger.transactions.push(RecordedTransaction {
            transaction_id: transaction_id.clone(),
            request: transaction,
        });
        ledger.stats.transactions_created += 1;
        Ok(TransactionReceipt {
            transaction_id,
            status: "PROCESSING".to_string(),
        })
    }

    async fn get_rates(&self, base: &str, symbols: &[String]) -> Result<RateTable, GatewayError> {
        let _call = self.round_trip().await;
        let usd = Self::usd_rates();
        let base_rate = usd.get(base).copied().ok_or_else(|| {
            GatewayError::rejected("UNSUPPORTED_CURRENCY", format!("unknown base '{}'", base))
        })?;

        let mut quotes = BTreeMap::new();
        for symbol in symbols {
            let rate = usd.get(symbol).ok_or_else(|| {
                GatewayError::rejected("UNSUPPORTED_CURRENCY", format!("unknown symbol '{}'", symbol))
            })?;
            let cross = (*rate / base_rate).round_dp(6).normalize();
            quotes.insert(symbol.clone(), cross.to_string());
        }

        Ok(RateTable {
            rates: BTreeMap::from([(base.to_string(), quotes)]),
            updated_at: Utc::now().timestamp(),
        })
    }
}
