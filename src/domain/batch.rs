use super::money::MinorUnits;
use super::payout::{Payout, PayoutStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Summary status of a batch, derived from its members.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchStatus {
    Pending,
    Processing,
    Partial,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn derive(payouts: &[Payout]) -> Self {
        let count = |status| payouts.iter().filter(|p| p.status == status).count();
        let pending = count(PayoutStatus::Pending);
        let succeeded = count(PayoutStatus::Success);
        let failed = count(PayoutStatus::Failed);

        if pending == payouts.len() {
            Self::Pending
        } else if succeeded + failed < payouts.len() {
            Self::Processing
        } else if failed == 0 {
            Self::Completed
        } else if succeeded == 0 {
            Self::Failed
        } else {
            Self::Partial
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Partial | Self::Completed | Self::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Partial => "PARTIAL",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A view over every payout sharing a batch id. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub total_amount: MinorUnits,
    pub total_count: usize,
    pub status: BatchStatus,
    pub payouts: Vec<Payout>,
}

impl Batch {
    pub fn from_payouts(id: impl Into<String>, payouts: Vec<Payout>) -> Self {
        Self {
            id: id.into(),
            total_amount: payouts.iter().map(|p| p.amount).sum(),
            total_count: payouts.len(),
            status: BatchStatus::derive(&payouts),
            payouts,
        }
    }

    pub fn count_with(&self, status: PayoutStatus) -> usize {
        self.payouts.iter().filter(|p| p.status == status).count()
    }
}

/// Returned by a non-blocking submission once the batch is durably recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReceipt {
    pub batch_id: String,
    pub status: SubmissionStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubmissionStatus {
    Accepted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payout::PayoutRequest;

    fn payouts(statuses: &[PayoutStatus]) -> Vec<Payout> {
        statuses
            .iter()
            .enumerate()
            .map(|(i, status)| {
                let mut payout = Payout::from_request(
                    "batch-1",
                    "REF",
                    PayoutRequest {
                        amount: MinorUnits::new(100 * (i as i64 + 1)).unwrap(),
                        ..Default::default()
                    },
                );
                payout.status = *status;
                payout
            })
            .collect()
    }

    #[test]
    fn test_status_derivation() {
        use PayoutStatus::*;
        assert_eq!(BatchStatus::derive(&payouts(&[Pending, Pending])), BatchStatus::Pending);
        assert_eq!(
            BatchStatus::derive(&payouts(&[Pending, Success])),
            BatchStatus::Processing
        );
        assert_eq!(
            BatchStatus::derive(&payouts(&[Processing, Processing])),
            BatchStatus::Processing
        );
        assert_eq!(
            BatchStatus::derive(&payouts(&[Success, Success])),
            BatchStatus::Completed
        );
        assert_eq!(BatchStatus::derive(&payouts(&[Failed, Failed])), BatchStatus::Failed);
        assert_eq!(
            BatchStatus::derive(&payouts(&[Success, Failed, Success])),
            BatchStatus::Partial
        );
    }

    #[test]
    fn test_totals_include_failed_members() {
        use PayoutStatus::*;
        let batch = Batch::from_payouts("batch-1", payouts(&[Success, Failed, Success]));
        assert_eq!(batch.total_count, 3);
        assert_eq!(batch.total_amount.value(), 100 + 200 + 300);
        assert_eq!(batch.count_with(Failed), 1);
        assert!(batch.status.is_settled());
    }
}
