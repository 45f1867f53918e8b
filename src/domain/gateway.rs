//! Value types exchanged with the payment rail through [`PaymentGateway`].
//!
//! [`PaymentGateway`]: super::ports::PaymentGateway

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCustomer {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub country_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    BankAccount,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Institution {
    pub institution_code: Option<String>,
    pub institution_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPaymentMethod {
    pub channel: Channel,
    pub customer_id: String,
    pub account_name: String,
    pub account_number: String,
    pub country_code: String,
    pub institution: Institution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub customer_id: String,
    pub payment_method_id: String,
    pub source_currency: String,
    pub destination_currency: String,
    /// Decimal string with exactly two fractional digits, e.g. `"5000.00"`.
    pub destination_amount: String,
    /// Requests carrying the same key must not move money twice.
    pub idempotency_key: String,
    pub meta: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_id: String,
    pub status: String,
}

/// FX rates keyed by base currency, then quote currency.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RateTable {
    pub rates: BTreeMap<String, BTreeMap<String, String>>,
    pub updated_at: i64,
}

impl RateTable {
    pub fn rate(&self, base: &str, quote: &str) -> Option<&str> {
        self.rates.get(base)?.get(quote).map(String::as_str)
    }
}
