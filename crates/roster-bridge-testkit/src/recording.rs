//! A store wrapper that records committed batches and injects failures.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use roster_bridge_core::{AccountId, ContactKey, LocalId, PersistedContact};
use roster_bridge_store::{ContactStore, Result, StoreError};

/// One batch that reached the inner store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedBatch {
    Save(Vec<PersistedContact>),
    Remove(Vec<LocalId>),
}

/// Wraps a [`ContactStore`], recording every successful batch.
///
/// Failures are injected as [`StoreError::Unavailable`], before the inner
/// store sees the batch.
pub struct RecordingStore<S> {
    inner: S,
    batches: Mutex<Vec<RecordedBatch>>,
    /// Number of upcoming write batches to fail.
    fail_writes: AtomicUsize,
    /// Writes to let through before failing starts.
    skip_writes: AtomicUsize,
    /// Fail every operation, including `check`.
    unavailable: AtomicBool,
}

impl<S: ContactStore> RecordingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            batches: Mutex::new(Vec::new()),
            fail_writes: AtomicUsize::new(0),
            skip_writes: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Fail the next `count` save or remove batches.
    pub fn fail_next_writes(&self, count: usize) {
        self.fail_writes_after(0, count);
    }

    /// Let `skip` write batches through, then fail the next `count`.
    pub fn fail_writes_after(&self, skip: usize, count: usize) {
        self.skip_writes.store(skip, Ordering::SeqCst);
        self.fail_writes.store(count, Ordering::SeqCst);
    }

    /// Make every operation fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// All recorded batches, in commit order.
    pub fn batches(&self) -> Vec<RecordedBatch> {
        self.lock().clone()
    }

    /// Recorded save batches only.
    pub fn saves(&self) -> Vec<Vec<PersistedContact>> {
        self.lock()
            .iter()
            .filter_map(|b| match b {
                RecordedBatch::Save(contacts) => Some(contacts.clone()),
                RecordedBatch::Remove(_) => None,
            })
            .collect()
    }

    /// Recorded remove batches only.
    pub fn removes(&self) -> Vec<Vec<LocalId>> {
        self.lock()
            .iter()
            .filter_map(|b| match b {
                RecordedBatch::Remove(ids) => Some(ids.clone()),
                RecordedBatch::Save(_) => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RecordedBatch>> {
        self.batches.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected: store offline".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        self.check_available()?;
        if self.fail_writes.load(Ordering::SeqCst) == 0 {
            return Ok(());
        }
        let skipped = self
            .skip_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if skipped {
            return Ok(());
        }
        let failing = self
            .fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Unavailable("injected: write failed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: ContactStore> ContactStore for RecordingStore<S> {
    async fn check(&self) -> Result<()> {
        self.check_available()?;
        self.inner.check().await
    }

    async fn get_contact(&self, id: LocalId) -> Result<Option<PersistedContact>> {
        self.check_available()?;
        self.inner.get_contact(id).await
    }

    async fn find_by_key(&self, key: &ContactKey) -> Result<Option<PersistedContact>> {
        self.check_available()?;
        self.inner.find_by_key(key).await
    }

    async fn contacts_for_account(&self, account: &AccountId) -> Result<Vec<PersistedContact>> {
        self.check_available()?;
        self.inner.contacts_for_account(account).await
    }

    async fn self_contact(&self) -> Result<Option<PersistedContact>> {
        self.check_available()?;
        self.inner.self_contact().await
    }

    async fn save_batch(&self, contacts: &[PersistedContact]) -> Result<Vec<LocalId>> {
        self.check_write()?;
        let ids = self.inner.save_batch(contacts).await?;
        self.lock().push(RecordedBatch::Save(contacts.to_vec()));
        Ok(ids)
    }

    async fn remove_batch(&self, ids: &[LocalId]) -> Result<()> {
        self.check_write()?;
        self.inner.remove_batch(ids).await?;
        self.lock().push(RecordedBatch::Remove(ids.to_vec()));
        Ok(())
    }
}
