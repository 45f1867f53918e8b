use super::in_memory::{already_exists, apply_update, sort_recent_first};
use crate::domain::payout::{Payout, PayoutStatus, StatusUpdate};
use crate::domain::ports::PayoutRepository;
use crate::error::{PayoutError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family storing payout rows keyed by payout id.
pub const CF_PAYOUTS: &str = "payouts";
/// Column Family indexing payouts by batch: `<batch_id>\0<payout_id>` → empty.
pub const CF_BATCH_INDEX: &str = "batch_index";

/// A persistent payout repository backed by RocksDB.
///
/// Rows are stored as JSON. Status updates are read-modify-write cycles, so
/// they are serialized through a write lock; reads go straight to the DB.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbPayoutRepository {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbPayoutRepository {
    /// Opens or creates a RocksDB instance at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_payouts = ColumnFamilyDescriptor::new(CF_PAYOUTS, Options::default());
        let cf_index = ColumnFamilyDescriptor::new(CF_BATCH_INDEX, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_payouts, cf_index])?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PayoutError::Storage(format!("column family '{}' not found", name)))
    }

    fn index_key(batch_id: &str, payout_id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(batch_id.len() + payout_id.len() + 1);
        key.extend_from_slice(batch_id.as_bytes());
        key.push(0);
        key.extend_from_slice(payout_id.as_bytes());
        key
    }

    fn read(&self, id: &str) -> Result<Option<Payout>> {
        let cf = self.cf(CF_PAYOUTS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| PayoutError::storage(format!("failed to decode payout {}", id), e)),
            None => Ok(None),
        }
    }

    fn encode(payout: &Payout) -> Result<Vec<u8>> {
        serde_json::to_vec(payout)
            .map_err(|e| PayoutError::storage(format!("failed to encode payout {}", payout.id), e))
    }

    fn write(&self, payout: &Payout) -> Result<()> {
        let cf = self.cf(CF_PAYOUTS)?;
        self.db.put_cf(cf, payout.id.as_bytes(), Self::encode(payout)?)?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<Payout>> {
        let cf = self.cf(CF_PAYOUTS)?;
        let mut payouts = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let payout: Payout = serde_json::from_slice(&value)
                .map_err(|e| PayoutError::storage("failed to decode payout", e))?;
            payouts.push(payout);
        }
        Ok(payouts)
    }
}

#[async_trait]
impl PayoutRepository for RocksDbPayoutRepository {
    async fn save_payout(&self, payout: Payout) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.read(&payout.id)? {
            return Err(already_exists(&existing));
        }

        // Row and index entry land together or not at all.
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_PAYOUTS)?, payout.id.as_bytes(), Self::encode(&payout)?);
        batch.put_cf(
            self.cf(CF_BATCH_INDEX)?,
            Self::index_key(&payout.batch_id, &payout.id),
            b"",
        );
        self.db.write(batch)?;
        Ok(())
    }

    async fn get_payout(&self, id: &str) -> Result<Payout> {
        self.read(id)?
            .ok_or_else(|| PayoutError::NotFound(format!("payout {}", id)))
    }

    async fn update_payout_status(&self, id: &str, update: StatusUpdate) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut payout = self
            .read(id)?
            .ok_or_else(|| PayoutError::NotFound(format!("payout {}", id)))?;
        apply_update(&mut payout, &update)?;
        self.write(&payout)
    }

    async fn list_payouts(&self, limit: usize) -> Result<Vec<Payout>> {
        let mut payouts = self.scan()?;
        sort_recent_first(&mut payouts);
        payouts.truncate(limit);
        Ok(payouts)
    }

    async fn list_payouts_by_batch_id(&self, batch_id: &str) -> Result<Vec<Payout>> {
        let index = self.cf(CF_BATCH_INDEX)?;
        let mut prefix = batch_id.as_bytes().to_vec();
        prefix.push(0);

        let mut payouts = Vec::new();
        let iter = self
            .db
            .iterator_cf(index, IteratorMode::From(prefix.as_slice(), Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            let Some(payout_id) = key.strip_prefix(prefix.as_slice()) else {
                break;
            };
            let payout_id = String::from_utf8_lossy(payout_id);
            if let Some(payout) = self.read(&payout_id)? {
                payouts.push(payout);
            }
        }

        if payouts.is_empty() {
            return Err(PayoutError::NotFound(format!("batch {}", batch_id)));
        }
        sort_recent_first(&mut payouts);
        Ok(payouts)
    }

    async fn list_payouts_by_status(&self, statuses: &[PayoutStatus]) -> Result<Vec<Payout>> {
        let mut payouts: Vec<Payout> = self
            .scan()?
            .into_iter()
            .filter(|p| statuses.contains(&p.status))
            .collect();
        sort_recent_first(&mut payouts);
        Ok(payouts)
    }
}
