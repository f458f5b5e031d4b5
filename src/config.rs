//! Runtime configuration for a catalog session
//!
//! Nothing here is persisted. Defaults are compiled in and a handful of
//! environment variables can override them for the headless runner.

use std::path::PathBuf;
use std::time::Duration;

/// Public photo listing used by default
pub const DEFAULT_BASE_URL: &str = "https://picsum.photos";

/// Page size the remote listing uses when no limit is given
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// How cached records are paged when the remote feed is unreachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OfflinePaging {
    /// Page `k` gets the k-th window of the cache, so offline paging ends
    #[default]
    Slice,
    /// Every page gets the whole cache
    WholeCache,
}

impl OfflinePaging {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "slice" => Some(OfflinePaging::Slice),
            "whole" | "whole-cache" | "whole_cache" => Some(OfflinePaging::WholeCache),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Root of the listing API (`{base_url}/v2/list`)
    pub base_url: String,
    pub page_size: u32,
    /// Per-request timeout for the remote feed
    pub request_timeout: Duration,
    /// SQLite file backing the photo cache
    pub db_path: PathBuf,
    pub offline_paging: OfflinePaging,
    /// Poll interval for monitors that have no push notifications
    pub monitor_poll_interval: Duration,
    /// Buffer of the catalog event bus
    pub event_capacity: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: Duration::from_secs(10),
            db_path: default_db_path(),
            offline_paging: OfflinePaging::default(),
            monitor_poll_interval: Duration::from_secs(2),
            event_capacity: 256,
        }
    }
}

impl CatalogConfig {
    /// Defaults overridden by `ALBUM_SYNC_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning rather than failing startup.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("ALBUM_SYNC_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(raw) = lookup("ALBUM_SYNC_PAGE_SIZE") {
            match raw.parse::<u32>() {
                Ok(size) if size > 0 => config.page_size = size,
                _ => tracing::warn!(value = %raw, "ignoring invalid ALBUM_SYNC_PAGE_SIZE"),
            }
        }
        if let Some(raw) = lookup("ALBUM_SYNC_TIMEOUT_SECS") {
            match raw.parse::<u64>() {
                Ok(secs) => config.request_timeout = Duration::from_secs(secs),
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid ALBUM_SYNC_TIMEOUT_SECS"),
            }
        }
        if let Some(path) = lookup("ALBUM_SYNC_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("ALBUM_SYNC_OFFLINE_PAGING") {
            match OfflinePaging::parse(&raw) {
                Some(mode) => config.offline_paging = mode,
                None => tracing::warn!(value = %raw, "ignoring invalid ALBUM_SYNC_OFFLINE_PAGING"),
            }
        }

        config
    }
}

/// Get the path where the photo cache should be stored
///
/// - Linux: ~/.local/share/album-sync/photo_database.db
/// - macOS: ~/Library/Application Support/album-sync/photo_database.db
/// - Windows: %APPDATA%\album-sync\photo_database.db
///
/// Falls back to the working directory when no home is known.
pub fn default_db_path() -> PathBuf {
    let mut path = dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    path.push("album-sync");
    path.push("photo_database.db");
    path
}
