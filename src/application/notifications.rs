use super::shutdown::ShutdownSignal;
use crate::domain::batch::Batch;
use crate::domain::ports::BatchNotifierRef;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, Span, error, info, info_span, warn};

/// Supervised, best-effort delivery of batch completion notifications.
///
/// `dispatch` never waits: each delivery becomes a task tracked by the pool.
/// At most `max_in_flight` deliveries talk to the notifier at once; the rest
/// wait for a slot. Failures are logged and dropped, never retried.
pub struct NotificationPool {
    notifier: BatchNotifierRef,
    slots: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    shutdown: ShutdownSignal,
    span: Span,
}

impl NotificationPool {
    pub fn new(notifier: BatchNotifierRef, max_in_flight: usize, span: Span) -> Self {
        Self {
            notifier,
            slots: Arc::new(Semaphore::new(max_in_flight.max(1))),
            tasks: Mutex::new(JoinSet::new()),
            shutdown: ShutdownSignal::new(),
            span,
        }
    }

    /// Queues delivery of `batch`. Must be called from within a tokio runtime.
    pub fn dispatch(&self, batch: Batch) {
        if self.shutdown.is_triggered() {
            warn!(batch_id = %batch.id, "notification pool is shut down, dropping notification");
            return;
        }

        let notifier = Arc::clone(&self.notifier);
        let slots = Arc::clone(&self.slots);
        let mut shutdown = self.shutdown.subscribe();
        let span = info_span!(parent: &self.span, "notify", batch_id = %batch.id);

        let delivery = async move {
            let _permit = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    warn!("notification dropped before delivery by shutdown");
                    return;
                }
                permit = slots.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            let result = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    warn!("notification delivery cancelled by shutdown");
                    return;
                }
                result = notifier.notify_batch_completion(&batch.id, &batch.payouts) => result,
            };

            match result {
                Ok(()) => info!(count = batch.payouts.len(), "client notified of batch completion"),
                Err(e) => error!(error = %e, "client notification failed"),
            }
        };

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        // Reap finished deliveries so the set does not grow with history.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(delivery.instrument(span));
    }

    /// Number of deliveries queued or running.
    pub fn pending(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Waits up to `grace` for outstanding deliveries, then cancels the rest.
    ///
    /// Returns the number of deliveries that were abandoned.
    pub async fn drain(&self, grace: Duration) -> usize {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };

        let finished = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        self.shutdown.trigger();
        if finished.is_ok() {
            return 0;
        }

        let abandoned = tasks.len();
        warn!(abandoned, "notification drain timed out, cancelling deliveries");
        tasks.shutdown().await;
        abandoned
    }
}
