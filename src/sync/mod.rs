//! Remote-to-cache synchronization
//!
//! - One fetch cycle with favorite-preserving merge and cache fallback (merge.rs)
//! - Page-key state machine on top of it (cursor.rs)

pub mod merge;
pub mod cursor;

pub use cursor::{LoadedPage, PagedCursor};
pub use merge::{MergeSync, Provenance, SyncedPage};
