use crate::error::Result;
use crate::state::{PageCursor, PhotoRecord};

use super::merge::{MergeSync, SyncedPage};

/// A page delivered by the cursor together with the cursor state after it
#[derive(Debug, Clone)]
pub struct LoadedPage {
    pub synced: SyncedPage,
    pub cursor: PageCursor,
}

impl LoadedPage {
    pub fn records(&self) -> &[PhotoRecord] {
        &self.synced.records
    }
}

/// Page-key state machine over `MergeSync`.
///
/// Keys are 1-based. An empty page ends forward paging; after that
/// `load_next` returns empty pages without touching the feed until
/// `refresh` is called. Cache-served pages advance the keys like live ones.
#[derive(Debug, Clone)]
pub struct PagedCursor {
    page_size: u32,
    state: PageCursor,
    /// prev key of the first page in the loaded window
    head_prev: Option<u32>,
}

impl PagedCursor {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            state: PageCursor::default(),
            head_prev: None,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn state(&self) -> PageCursor {
        self.state
    }

    /// Key the next `load_next` will fetch, `None` once paging has ended
    pub fn next_key_to_load(&self) -> Option<u32> {
        if self.state.is_exhausted() {
            None
        } else {
            Some(self.state.next_key.unwrap_or(PageCursor::START_KEY))
        }
    }

    /// Key `load_previous` would fetch
    pub fn previous_key(&self) -> Option<u32> {
        self.head_prev
    }

    /// Record that `key` produced `records`.
    ///
    /// A key behind the current one comes from a load that finished late;
    /// the cursor stays where it is.
    pub fn advance(&mut self, key: u32, records: &[PhotoRecord]) -> PageCursor {
        if self.state.current_key.is_some_and(|current| key < current) {
            return self.state;
        }

        let prev_key = key_before(key);
        if self.state.current_key.is_none() {
            self.head_prev = prev_key;
        }

        // Past the last representable key the feed has ended
        let next_key = if records.is_empty() { None } else { key.checked_add(1) };
        self.state = PageCursor {
            current_key: Some(key),
            prev_key,
            next_key,
        };
        self.state
    }

    /// Forget every loaded page; the next load starts at page 1.
    pub fn refresh(&mut self) {
        self.start_at(PageCursor::START_KEY);
    }

    /// Restart the window at an arbitrary page
    pub fn start_at(&mut self, key: u32) {
        self.state = PageCursor {
            current_key: None,
            prev_key: None,
            next_key: Some(key.max(PageCursor::START_KEY)),
        };
        self.head_prev = None;
    }

    pub async fn load_next(&mut self, sync: &MergeSync) -> Result<LoadedPage> {
        let Some(key) = self.next_key_to_load() else {
            let page = self.state.current_key.unwrap_or(PageCursor::START_KEY);
            return Ok(LoadedPage {
                synced: SyncedPage {
                    page,
                    records: Vec::new(),
                    provenance: super::merge::Provenance::Live,
                    synced_at: chrono::Utc::now(),
                },
                cursor: self.state,
            });
        };

        let synced = sync.sync_page(key, self.page_size).await?;
        let cursor = self.advance(key, &synced.records);
        if cursor.next_key.is_none() {
            tracing::debug!(page = key, "reached end of photo feed");
        }
        Ok(LoadedPage { synced, cursor })
    }

    /// Load the page before the loaded window, if there is one.
    pub async fn load_previous(&mut self, sync: &MergeSync) -> Result<Option<LoadedPage>> {
        let Some(key) = self.head_prev else {
            return Ok(None);
        };

        let synced = sync.sync_page(key, self.page_size).await?;
        self.head_prev = key_before(key);
        Ok(Some(LoadedPage {
            synced,
            cursor: self.state,
        }))
    }
}

fn key_before(key: u32) -> Option<u32> {
    key.checked_sub(1).filter(|prev| *prev >= PageCursor::START_KEY)
}
