//! Offline-first photo catalog
//!
//! Pages of photo metadata are fetched from a remote listing, merged into a
//! local SQLite cache without ever clobbering favorite flags, and served
//! from that cache whenever the network is unavailable. A
//! [`CatalogController`] keeps three views (paged list, favorites, search
//! results) consistent with the cache after every change it makes.

pub mod catalog;
pub mod config;
pub mod error;
pub mod network;
pub mod remote;
pub mod state;
pub mod sync;

pub use catalog::{CatalogController, CatalogEvent, LoadOutcome, PageSummary};
pub use config::{CatalogConfig, OfflinePaging};
pub use error::{CatalogError, NetworkError, Result};
pub use network::{ConnectivityMonitor, ManualMonitor, NetworkGate, SysfsMonitor};
pub use remote::{HttpFeed, RemoteFeed};
pub use state::{PageCursor, PhotoLibrary, PhotoRecord, PhotoStore};
pub use sync::{MergeSync, PagedCursor, Provenance, SyncedPage};
