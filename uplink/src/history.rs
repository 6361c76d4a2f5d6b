use crate::errors::StoreError;
use crate::record::{UploadRecord, UploadStatus};
use crate::store::HistoryStore;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Read-through cache of the recent-upload history, keyed by record id.
///
/// Two writers exist: `refresh` pulls the store's view wholesale (the store
/// is authoritative), and `apply` patches a single submission result locally
/// so the view updates without waiting for the next pull. The local patch
/// never rewrites a row the cache already knows to be terminal.
pub struct HistoryCache {
    store: Arc<dyn HistoryStore>,
    limit: usize,
    rows: RwLock<Vec<UploadRecord>>,
}

impl HistoryCache {
    pub fn new(store: Arc<dyn HistoryStore>, limit: usize) -> Self {
        Self {
            store,
            limit,
            rows: RwLock::new(Vec::new()),
        }
    }

    /// Replace the snapshot with the store's current view.
    pub async fn refresh(&self) -> Result<(), StoreError> {
        let rows = self.store.recent(self.limit).await?;
        *self.rows.write().await = rows;
        Ok(())
    }

    /// Current records, most recent first.
    pub async fn snapshot(&self) -> Vec<UploadRecord> {
        self.rows.read().await.clone()
    }

    /// Add a freshly created record to the front of the view.
    pub async fn push_front(&self, record: UploadRecord) {
        let mut rows = self.rows.write().await;
        rows.insert(0, record);
        rows.truncate(self.limit);
    }

    /// Patch one record's terminal outcome locally.
    pub async fn apply(
        &self,
        id: &str,
        status: UploadStatus,
        row_count: Option<u32>,
        error_message: Option<String>,
    ) {
        let mut rows = self.rows.write().await;
        if let Some(row) = rows.iter_mut().find(|row| row.id == id)
            && !row.status.is_terminal()
        {
            row.status = status;
            row.row_count = row_count;
            row.error_message = error_message;
        }
    }
}
