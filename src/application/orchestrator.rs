use super::notifications::NotificationPool;
use super::shutdown::ShutdownSignal;
use super::workflow::{PayoutWorkflow, WorkflowOutcome};
use crate::config::OrchestratorConfig;
use crate::domain::batch::{Batch, BatchReceipt, SubmissionStatus};
use crate::domain::gateway::RateTable;
use crate::domain::payout::{Payout, PayoutStatus};
use crate::domain::ports::{BatchNotifierRef, PaymentGatewayRef, PayoutRepositoryRef};
use crate::error::{PayoutError, Result};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

/// The batch orchestration engine.
///
/// Owns the batch lifecycle: initial persistence, the bounded fan-out of one
/// worker per payout, the completion barrier and the hand-off of the final
/// state to the notification pool. Cloning is cheap and shares the engine.
#[derive(Clone)]
pub struct PayoutOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    repository: PayoutRepositoryRef,
    gateway: PaymentGatewayRef,
    workflow: PayoutWorkflow,
    /// Admission gate bounding concurrent gateway work across all batches.
    gate: Arc<Semaphore>,
    notifications: NotificationPool,
    shutdown: ShutdownSignal,
    background: Mutex<JoinSet<()>>,
    running: RunningBatches,
    span: Span,
}

/// Batch ids with a run in progress on this engine, counted per id.
#[derive(Clone, Default)]
struct RunningBatches(Arc<Mutex<HashMap<String, usize>>>);

impl RunningBatches {
    fn track(&self, batch_id: &str) -> RunningGuard {
        let mut runs = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *runs.entry(batch_id.to_string()).or_default() += 1;
        RunningGuard {
            batches: self.clone(),
            batch_id: batch_id.to_string(),
        }
    }

    /// Tracks `batch_id` only if no run of it is in progress.
    fn track_if_idle(&self, batch_id: &str) -> Option<RunningGuard> {
        let mut runs = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if runs.contains_key(batch_id) {
            return None;
        }
        runs.insert(batch_id.to_string(), 1);
        Some(RunningGuard {
            batches: self.clone(),
            batch_id: batch_id.to_string(),
        })
    }
}

struct RunningGuard {
    batches: RunningBatches,
    batch_id: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut runs = self
            .batches
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = runs.get_mut(&self.batch_id) {
            *count -= 1;
            if *count == 0 {
                runs.remove(&self.batch_id);
            }
        }
    }
}

/// Assembles a [`PayoutOrchestrator`] from its ports.
pub struct OrchestratorBuilder {
    repository: PayoutRepositoryRef,
    gateway: PaymentGatewayRef,
    notifier: BatchNotifierRef,
    config: OrchestratorConfig,
    span: Option<Span>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Span every log record of the engine is emitted under.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> Result<PayoutOrchestrator> {
        self.config.validate()?;
        let span = self
            .span
            .unwrap_or_else(|| info_span!("payout_orchestrator"));

        let inner = Inner {
            gate: Arc::new(Semaphore::new(self.config.concurrency_limit)),
            notifications: NotificationPool::new(
                self.notifier,
                self.config.notify_in_flight,
                span.clone(),
            ),
            workflow: PayoutWorkflow::new(
                Arc::clone(&self.repository),
                Arc::clone(&self.gateway),
                self.config,
            ),
            repository: self.repository,
            gateway: self.gateway,
            shutdown: ShutdownSignal::new(),
            background: Mutex::new(JoinSet::new()),
            running: RunningBatches::default(),
            span,
        };
        Ok(PayoutOrchestrator {
            inner: Arc::new(inner),
        })
    }
}

impl PayoutOrchestrator {
    pub fn builder(
        repository: PayoutRepositoryRef,
        gateway: PaymentGatewayRef,
        notifier: BatchNotifierRef,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            repository,
            gateway,
            notifier,
            config: OrchestratorConfig::default(),
            span: None,
        }
    }

    /// Persists the batch, drives every payout to a terminal status and
    /// returns the final batch view.
    ///
    /// Only validation and initial persistence errors are returned; per-payout
    /// failures are recorded on the payouts. The completion notification is
    /// queued, not awaited.
    pub async fn execute_batch(&self, batch_id: &str, payouts: Vec<Payout>) -> Result<Batch> {
        let payouts = self.inner.persist_batch(batch_id, payouts).await?;
        let _running = self.inner.running.track(batch_id);
        Arc::clone(&self.inner).run_batch(batch_id, payouts).await
    }

    /// Persists the batch and returns immediately; processing continues on a
    /// supervised background task. Poll [`get_batch_status`] for the outcome.
    ///
    /// [`get_batch_status`]: Self::get_batch_status
    pub async fn submit_batch(&self, batch_id: &str, payouts: Vec<Payout>) -> Result<BatchReceipt> {
        let payouts = self.inner.persist_batch(batch_id, payouts).await?;
        let running = self.inner.running.track(batch_id);
        self.inner.spawn_batch(batch_id.to_string(), payouts, running);
        Ok(BatchReceipt {
            batch_id: batch_id.to_string(),
            status: SubmissionStatus::Accepted,
            message: format!("Batch accepted. Check status for batch {}", batch_id),
        })
    }

    /// Re-drives every payout left in PENDING or PROCESSING, e.g. after a
    /// crash. Batches this engine is still running are skipped.
    ///
    /// Returns how many payouts were picked up.
    pub async fn resume_unfinished(&self) -> Result<usize> {
        let unfinished = self
            .inner
            .repository
            .list_payouts_by_status(&[PayoutStatus::Pending, PayoutStatus::Processing])
            .await?;

        let mut by_batch: BTreeMap<String, Vec<Payout>> = BTreeMap::new();
        for payout in unfinished {
            by_batch
                .entry(payout.batch_id.clone())
                .or_default()
                .push(payout);
        }

        let mut count = 0;
        for (batch_id, payouts) in by_batch {
            let Some(running) = self.inner.running.track_if_idle(&batch_id) else {
                debug!(parent: &self.inner.span, %batch_id, "batch already running, not resuming");
                continue;
            };
            info!(parent: &self.inner.span, %batch_id, count = payouts.len(), "resuming unfinished batch");
            count += payouts.len();
            self.inner.spawn_batch(batch_id, payouts, running);
        }
        Ok(count)
    }

    /// Waits for every batch running in the background to finish.
    pub async fn wait_idle(&self) {
        loop {
            let mut tasks = {
                let mut guard = self
                    .inner
                    .background
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *guard)
            };
            if tasks.is_empty() {
                return;
            }
            while tasks.join_next().await.is_some() {}
        }
    }

    /// Cancels in-flight work, then drains background batches and pending
    /// notifications, each for at most `grace`.
    ///
    /// Interrupted payouts stay in PROCESSING for [`resume_unfinished`]. The
    /// engine cannot run new batches afterwards.
    ///
    /// [`resume_unfinished`]: Self::resume_unfinished
    pub async fn shutdown(&self, grace: Duration) {
        info!(parent: &self.inner.span, "shutting down payout orchestrator");
        self.inner.shutdown.trigger();

        let mut tasks = {
            let mut guard = self
                .inner
                .background
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(parent: &self.inner.span, remaining = tasks.len(), "background batches did not stop in time, aborting");
            tasks.shutdown().await;
        }

        self.inner.notifications.drain(grace).await;
    }

    pub async fn get_batch_status(&self, batch_id: &str) -> Result<Batch> {
        let payouts = self.inner.repository.list_payouts_by_batch_id(batch_id).await?;
        if payouts.is_empty() {
            return Err(PayoutError::NotFound(format!("batch {}", batch_id)));
        }
        Ok(Batch::from_payouts(batch_id, payouts))
    }

    pub async fn list_payouts(&self, limit: usize) -> Result<Vec<Payout>> {
        self.inner.repository.list_payouts(limit).await
    }

    pub async fn get_payout(&self, id: &str) -> Result<Payout> {
        self.inner.repository.get_payout(id).await
    }

    pub async fn quote_rates(&self, base: &str, symbols: &[String]) -> Result<RateTable> {
        Ok(self.inner.gateway.get_rates(base, symbols).await?)
    }

    /// Notification deliveries queued or running.
    pub fn pending_notifications(&self) -> usize {
        self.inner.notifications.pending()
    }
}

impl Inner {
    async fn persist_batch(&self, batch_id: &str, payouts: Vec<Payout>) -> Result<Vec<Payout>> {
        validate_batch(batch_id, &payouts)?;

        // Ids are insert-only: a stored payout is never reset or moved to another batch.
        for payout in &payouts {
            match self.repository.get_payout(&payout.id).await {
                Ok(existing) => {
                    return Err(PayoutError::Validation(format!(
                        "payout {} already exists in batch {}",
                        payout.id, existing.batch_id
                    )));
                }
                Err(PayoutError::NotFound(_)) => {}
                Err(e) => {
                    return Err(PayoutError::storage(
                        format!("failed to look up payout {}", payout.id),
                        e,
                    ));
                }
            }
        }

        let now = Utc::now();
        let mut stamped = Vec::with_capacity(payouts.len());
        for mut payout in payouts {
            payout.status = PayoutStatus::Pending;
            payout.error_message = None;
            payout.transaction_id = None;
            payout.created_at = now;
            payout.updated_at = now;

            self.repository
                .save_payout(payout.clone())
                .await
                .map_err(|e| match e {
                    PayoutError::Validation(_) => e,
                    e => PayoutError::storage(format!("failed to save payout {}", payout.id), e),
                })?;
            stamped.push(payout);
        }
        Ok(stamped)
    }

    fn spawn_batch(self: &Arc<Self>, batch_id: String, payouts: Vec<Payout>, running: RunningGuard) {
        let inner = Arc::clone(self);
        let span = self.span.clone();
        let run = async move {
            let _running = running;
            if let Err(e) = inner.run_batch(&batch_id, payouts).await {
                error!(%batch_id, error = %e, "background batch failed");
            }
        };

        let mut tasks = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(run.instrument(span));
    }

    async fn run_batch(self: Arc<Self>, batch_id: &str, payouts: Vec<Payout>) -> Result<Batch> {
        let span = info_span!(parent: &self.span, "batch", %batch_id);
        async {
            info!(count = payouts.len(), "starting batch execution");

            let mut workers = Vec::with_capacity(payouts.len());
            for payout in payouts {
                let inner = Arc::clone(&self);
                let payout_id = payout.id.clone();
                let worker = async move { inner.drive(payout).await };
                workers.push((payout_id, tokio::spawn(worker.in_current_span())));
            }

            // Barrier: a worker that panicked must not keep the batch from settling.
            let mut interrupted = 0;
            for (payout_id, handle) in workers {
                match handle.await {
                    Ok(WorkflowOutcome::Interrupted) => interrupted += 1,
                    Ok(_) => {}
                    Err(e) => {
                        error!(%payout_id, error = %e, "payout worker aborted");
                        self.workflow
                            .record_failure(&payout_id, format!("Worker aborted: {}", e))
                            .await;
                    }
                }
            }

            let final_state = self.repository.list_payouts_by_batch_id(batch_id).await?;
            let batch = Batch::from_payouts(batch_id, final_state);
            info!(
                status = %batch.status,
                succeeded = batch.count_with(PayoutStatus::Success),
                failed = batch.count_with(PayoutStatus::Failed),
                "batch execution complete"
            );

            if interrupted > 0 {
                warn!(interrupted, status = %batch.status, "batch interrupted before settling, notification deferred");
            } else {
                if !batch.status.is_settled() {
                    warn!(status = %batch.status, "some payout statuses were not recorded");
                }
                self.notifications.dispatch(batch.clone());
            }
            Ok(batch)
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, payout: Payout) -> WorkflowOutcome {
        let mut shutdown = self.shutdown.subscribe();
        let _permit = tokio::select! {
            biased;
            _ = shutdown.triggered() => return WorkflowOutcome::Interrupted,
            permit = Arc::clone(&self.gate).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return WorkflowOutcome::Interrupted,
            },
        };
        self.workflow.run(&payout, &mut shutdown).await
    }
}

fn validate_batch(batch_id: &str, payouts: &[Payout]) -> Result<()> {
    if batch_id.trim().is_empty() {
        return Err(PayoutError::Validation("batch id must not be empty".to_string()));
    }
    if payouts.is_empty() {
        return Err(PayoutError::Validation(
            "batch must contain at least one payout".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(payouts.len());
    for payout in payouts {
        if payout.batch_id != batch_id {
            return Err(PayoutError::Validation(format!(
                "payout {} belongs to batch {}, not {}",
                payout.id, payout.batch_id, batch_id
            )));
        }
        if !seen.insert(payout.id.as_str()) {
            return Err(PayoutError::Validation(format!(
                "duplicate payout id {}",
                payout.id
            )));
        }
    }
    Ok(())
}
