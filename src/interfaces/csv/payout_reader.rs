use crate::domain::money::MinorUnits;
use crate::domain::payout::PayoutRequest;
use crate::error::{PayoutError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One line of a batch file, as written by the submitter.
///
/// Amounts are major-unit decimals (`5000.00`); they are converted to minor
/// units exactly when the row becomes a [`PayoutRequest`].
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct PayoutRow {
    pub recipient_name: String,
    #[serde(default)]
    pub recipient_phone: Option<String>,
    #[serde(default)]
    pub recipient_email: Option<String>,
    #[serde(default)]
    pub recipient_tag: Option<String>,
    pub country_code: String,
    #[serde(default)]
    pub bank_code: Option<String>,
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default)]
    pub bank_name: Option<String>,
    pub amount: Decimal,
    pub currency: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TryFrom<PayoutRow> for PayoutRequest {
    type Error = PayoutError;

    fn try_from(row: PayoutRow) -> Result<Self> {
        if row.recipient_name.trim().is_empty() {
            return Err(PayoutError::Validation(
                "recipient_name is required".to_string(),
            ));
        }
        let currency = row.currency.trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PayoutError::Validation(format!(
                "currency '{}' is not a three-letter code",
                row.currency
            )));
        }
        let country_code = row.country_code.trim().to_ascii_uppercase();
        if country_code.len() != 2 || !country_code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PayoutError::Validation(format!(
                "country_code '{}' is not a two-letter code",
                row.country_code
            )));
        }

        Ok(Self {
            recipient_name: row.recipient_name,
            recipient_phone: row.recipient_phone.unwrap_or_default(),
            recipient_email: row.recipient_email.unwrap_or_default(),
            recipient_tag: non_empty(row.recipient_tag),
            country_code,
            bank_code: non_empty(row.bank_code),
            account_number: non_empty(row.account_number),
            bank_name: non_empty(row.bank_name),
            amount: MinorUnits::from_major(row.amount)?,
            currency,
        })
    }
}

/// Reads payout requests from a CSV batch file.
///
/// This reader wraps `csv::Reader` and yields one `Result<PayoutRequest>` per
/// row, so a malformed row can be reported without losing the rest of the file.
pub struct PayoutReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> PayoutReader<R> {
    /// Creates a new `PayoutReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and validates payout requests.
    pub fn requests(self) -> impl Iterator<Item = Result<PayoutRequest>> {
        self.reader.into_deserialize::<PayoutRow>().map(|result| {
            result
                .map_err(PayoutError::from)
                .and_then(PayoutRequest::try_from)
        })
    }
}
