use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::OfflinePaging;
use crate::error::Result;
use crate::remote::RemoteFeed;
use crate::state::{PhotoRecord, PhotoStore};

/// Where the records of a synced page came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// Fetched from the remote feed and merged into the store
    Live,
    /// The feed failed; records are served from the store
    Cached { reason: String },
}

impl Provenance {
    pub fn is_live(&self) -> bool {
        matches!(self, Provenance::Live)
    }
}

/// Result of one fetch cycle
#[derive(Debug, Clone)]
pub struct SyncedPage {
    pub page: u32,
    /// Remote order when live, store order when cached
    pub records: Vec<PhotoRecord>,
    pub provenance: Provenance,
    pub synced_at: DateTime<Utc>,
}

/// Runs one fetch cycle: fetch, merge, or fall back to the cache.
///
/// Network failures become a cache-served page. Storage failures are
/// returned to the caller untouched.
pub struct MergeSync {
    feed: Arc<dyn RemoteFeed>,
    store: Arc<dyn PhotoStore>,
    offline_paging: OfflinePaging,
}

impl MergeSync {
    pub fn new(feed: Arc<dyn RemoteFeed>, store: Arc<dyn PhotoStore>) -> Self {
        Self {
            feed,
            store,
            offline_paging: OfflinePaging::default(),
        }
    }

    pub fn with_offline_paging(mut self, offline_paging: OfflinePaging) -> Self {
        self.offline_paging = offline_paging;
        self
    }

    pub fn store(&self) -> &Arc<dyn PhotoStore> {
        &self.store
    }

    pub async fn sync_page(&self, page: u32, page_size: u32) -> Result<SyncedPage> {
        match self.feed.fetch_page(page, page_size).await {
            Ok(records) => {
                // Merge before returning so no consumer acts on records the
                // store does not know about yet
                self.store.upsert_all(&records).await?;
                tracing::info!(page, count = records.len(), "✅ synced photo page");

                Ok(SyncedPage {
                    page,
                    records,
                    provenance: Provenance::Live,
                    synced_at: Utc::now(),
                })
            }
            Err(err) => {
                let cached = self.store.all().await?;
                let records = self.offline_window(cached, page, page_size);
                tracing::warn!(
                    page,
                    error = %err,
                    served = records.len(),
                    "⚠️  photo feed unavailable, serving cache"
                );

                Ok(SyncedPage {
                    page,
                    records,
                    provenance: Provenance::Cached {
                        reason: err.to_string(),
                    },
                    synced_at: Utc::now(),
                })
            }
        }
    }

    fn offline_window(
        &self,
        cached: Vec<PhotoRecord>,
        page: u32,
        page_size: u32,
    ) -> Vec<PhotoRecord> {
        match self.offline_paging {
            OfflinePaging::WholeCache => cached,
            OfflinePaging::Slice => {
                let size = page_size as usize;
                let start = (page.max(1) as usize - 1).saturating_mul(size);
                cached.into_iter().skip(start).take(size).collect()
            }
        }
    }
}
