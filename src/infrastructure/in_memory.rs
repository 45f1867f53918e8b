use crate::domain::payout::{Payout, PayoutStatus, StatusUpdate};
use crate::domain::ports::PayoutRepository;
use crate::error::{PayoutError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory payout repository.
///
/// Uses `Arc<RwLock<HashMap<String, Payout>>>` to allow shared concurrent access.
/// Ideal for tests and one-shot CLI runs where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryPayoutRepository {
    payouts: Arc<RwLock<HashMap<String, Payout>>>,
}

impl InMemoryPayoutRepository {
    /// Creates a new, empty in-memory repository.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Newest first, ties broken by id so listings are stable.
pub(crate) fn sort_recent_first(payouts: &mut [Payout]) {
    payouts.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

pub(crate) fn already_exists(existing: &Payout) -> PayoutError {
    PayoutError::Validation(format!(
        "payout {} already exists in batch {}",
        existing.id, existing.batch_id
    ))
}

/// Applies `update` to `payout`, rejecting transitions that move backwards.
pub(crate) fn apply_update(payout: &mut Payout, update: &StatusUpdate) -> Result<()> {
    let from = payout.status;
    if payout.apply(update) {
        Ok(())
    } else {
        Err(PayoutError::Validation(format!(
            "illegal status transition {} -> {} for payout {}",
            from, update.status, payout.id
        )))
    }
}

#[async_trait]
impl PayoutRepository for InMemoryPayoutRepository {
    async fn save_payout(&self, payout: Payout) -> Result<()> {
        let mut payouts = self.payouts.write().await;
        match payouts.entry(payout.id.clone()) {
            Entry::Occupied(existing) => Err(already_exists(existing.get())),
            Entry::Vacant(slot) => {
                slot.insert(payout);
                Ok(())
            }
        }
    }

    async fn get_payout(&self, id: &str) -> Result<Payout> {
        let payouts = self.payouts.read().await;
        payouts
            .get(id)
            .cloned()
            .ok_or_else(|| PayoutError::NotFound(format!("payout {}", id)))
    }

    async fn update_payout_status(&self, id: &str, update: StatusUpdate) -> Result<()> {
        let mut payouts = self.payouts.write().await;
        let payout = payouts
            .get_mut(id)
            .ok_or_else(|| PayoutError::NotFound(format!("payout {}", id)))?;
        apply_update(payout, &update)
    }

    async fn list_payouts(&self, limit: usize) -> Result<Vec<Payout>> {
        let payouts = self.payouts.read().await;
        let mut all: Vec<Payout> = payouts.values().cloned().collect();
        sort_recent_first(&mut all);
        all.truncate(limit);
        Ok(all)
    }

    async fn list_payouts_by_batch_id(&self, batch_id: &str) -> Result<Vec<Payout>> {
        let payouts = self.payouts.read().await;
        let mut batch: Vec<Payout> = payouts
            .values()
            .filter(|p| p.batch_id == batch_id)
            .cloned()
            .collect();
        if batch.is_empty() {
            return Err(PayoutError::NotFound(format!("batch {}", batch_id)));
        }
        sort_recent_first(&mut batch);
        Ok(batch)
    }

    async fn list_payouts_by_status(&self, statuses: &[PayoutStatus]) -> Result<Vec<Payout>> {
        let payouts = self.payouts.read().await;
        let mut matching: Vec<Payout> = payouts
            .values()
            .filter(|p| statuses.contains(&p.status))
            .cloned()
            .collect();
        sort_recent_first(&mut matching);
        Ok(matching)
    }
}
