use super::money::MinorUnits;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl PayoutStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Transitions only move forward: PENDING → PROCESSING → SUCCESS | FAILED.
    ///
    /// PENDING may fail directly (a worker that cannot start), and
    /// PROCESSING → PROCESSING is allowed so an interrupted payout can be resumed.
    pub fn can_transition_to(&self, next: PayoutStatus) -> bool {
        use PayoutStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Processing)
                | (Processing, Success)
                | (Processing, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayoutStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown payout status '{}'", other)),
        }
    }
}

/// The caller-owned part of a payout, before identity is minted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub recipient_name: String,
    pub recipient_phone: String,
    pub recipient_email: String,
    pub recipient_tag: Option<String>,
    pub country_code: String,
    pub bank_code: Option<String>,
    pub account_number: Option<String>,
    pub bank_name: Option<String>,
    pub amount: MinorUnits,
    pub currency: String,
}

/// One outbound money transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub id: String,
    pub batch_id: String,
    /// Stable reference sent to the rail as the idempotency key.
    pub reference_id: String,

    pub recipient_name: String,
    pub recipient_phone: String,
    pub recipient_email: String,
    pub recipient_tag: Option<String>,
    pub country_code: String,

    pub bank_code: Option<String>,
    pub account_number: Option<String>,
    pub bank_name: Option<String>,

    pub amount: MinorUnits,
    pub currency: String,

    pub status: PayoutStatus,
    pub error_message: Option<String>,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payout {
    /// Mints a payout for `batch_id` with a fresh id and a reference id of the
    /// form `<batch_reference>-<8 hex chars>`.
    pub fn from_request(batch_id: &str, batch_reference: &str, request: PayoutRequest) -> Self {
        let now = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            id: Uuid::new_v4().to_string(),
            batch_id: batch_id.to_string(),
            reference_id: format!("{}-{}", batch_reference, &suffix[..8]),
            recipient_name: request.recipient_name,
            recipient_phone: request.recipient_phone,
            recipient_email: request.recipient_email,
            recipient_tag: request.recipient_tag,
            country_code: request.country_code,
            bank_code: request.bank_code,
            account_number: request.account_number,
            bank_name: request.bank_name,
            amount: request.amount,
            currency: request.currency,
            status: PayoutStatus::Pending,
            error_message: None,
            transaction_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a status change in place. Illegal transitions are ignored and
    /// reported as `false`.
    pub fn apply(&mut self, update: &StatusUpdate) -> bool {
        if !self.status.can_transition_to(update.status) {
            return false;
        }
        self.status = update.status;
        self.error_message = update.error_message.clone();
        if update.transaction_id.is_some() {
            self.transaction_id = update.transaction_id.clone();
        }
        self.updated_at = Utc::now();
        true
    }
}

/// The engine-owned fields written after initial persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: PayoutStatus,
    pub error_message: Option<String>,
    pub transaction_id: Option<String>,
}

impl StatusUpdate {
    pub fn processing() -> Self {
        Self {
            status: PayoutStatus::Processing,
            error_message: None,
            transaction_id: None,
        }
    }

    pub fn success(transaction_id: impl Into<String>) -> Self {
        Self {
            status: PayoutStatus::Success,
            error_message: None,
            transaction_id: Some(transaction_id.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: PayoutStatus::Failed,
            error_message: Some(message.into()),
            transaction_id: None,
        }
    }
}
