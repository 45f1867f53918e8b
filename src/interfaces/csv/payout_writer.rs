use crate::domain::payout::Payout;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// One line of the batch report.
#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    id: &'a str,
    batch_id: &'a str,
    reference_id: &'a str,
    recipient_name: &'a str,
    amount: String,
    currency: &'a str,
    status: &'a str,
    transaction_id: &'a str,
    error_message: &'a str,
}

impl<'a> From<&'a Payout> for ReportRow<'a> {
    fn from(payout: &'a Payout) -> Self {
        Self {
            id: &payout.id,
            batch_id: &payout.batch_id,
            reference_id: &payout.reference_id,
            recipient_name: &payout.recipient_name,
            amount: payout.amount.to_major_string(),
            currency: &payout.currency,
            status: payout.status.as_str(),
            transaction_id: payout.transaction_id.as_deref().unwrap_or_default(),
            error_message: payout.error_message.as_deref().unwrap_or_default(),
        }
    }
}

/// Writes payouts as a CSV report, one row per payout.
pub struct PayoutWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PayoutWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_payouts<'a, I>(&mut self, payouts: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Payout>,
    {
        let mut wrote_any = false;
        for payout in payouts {
            self.writer.serialize(ReportRow::from(payout))?;
            wrote_any = true;
        }
        if !wrote_any {
            self.writer.write_record([
                "id",
                "batch_id",
                "reference_id",
                "recipient_name",
                "amount",
                "currency",
                "status",
                "transaction_id",
                "error_message",
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
