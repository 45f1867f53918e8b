use crate::domain::batch::Batch;
use crate::domain::payout::Payout;
use crate::domain::ports::BatchNotifier;
use crate::error::NotifyError;
use async_trait::async_trait;
use tracing::info;

/// Notifier that only records the completion summary in the log.
///
/// Used when no client webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl BatchNotifier for LogNotifier {
    async fn notify_batch_completion(
        &self,
        batch_id: &str,
        payouts: &[Payout],
    ) -> Result<(), NotifyError> {
        let batch = Batch::from_payouts(batch_id, payouts.to_vec());
        info!(
            batch_id,
            status = %batch.status,
            total_count = batch.total_count,
            total_amount = %batch.total_amount,
            "batch completed"
        );
        Ok(())
    }
}
