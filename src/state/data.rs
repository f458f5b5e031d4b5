//! Shared data structures for the catalog state
//!
//! These structs represent the data model that flows between
//! the remote feed, the database layer and the derived views.

use serde::{Deserialize, Serialize};

/// Represents a single photo in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRecord {
    /// Remote id, stable across fetches (e.g. "0", "1084")
    pub id: String,
    pub author: String,
    /// Full-size image URL
    pub download_url: String,
    /// Locally owned; the remote listing never sends it
    #[serde(default, rename = "isFavorite")]
    pub is_favorite: bool,
}

impl PhotoRecord {
    pub fn new(
        id: impl Into<String>,
        author: impl Into<String>,
        download_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            download_url: download_url.into(),
            is_favorite: false,
        }
    }

    /// Copy of this record carrying the given favorite flag
    pub fn with_favorite(mut self, is_favorite: bool) -> Self {
        self.is_favorite = is_favorite;
        self
    }
}

/// Forward/backward pagination state.
///
/// `current_key == None` means nothing has been loaded yet; the feed
/// starts at page 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageCursor {
    pub current_key: Option<u32>,
    pub prev_key: Option<u32>,
    pub next_key: Option<u32>,
}

impl PageCursor {
    /// First page of the feed
    pub const START_KEY: u32 = 1;

    /// True once a page has been loaded and there is no page after it
    pub fn is_exhausted(&self) -> bool {
        self.current_key.is_some() && self.next_key.is_none()
    }
}
