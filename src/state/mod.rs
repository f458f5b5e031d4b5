//! State management module
//!
//! This module handles the persistent side of the catalog:
//! - Database connection and queries (library.rs)
//! - Shared data structures (data.rs)

pub mod library;
pub mod data;

pub use data::{PageCursor, PhotoRecord};
pub use library::{PhotoLibrary, PhotoStore};
