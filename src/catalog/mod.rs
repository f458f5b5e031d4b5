//! Catalog orchestration
//!
//! This module is what consumers talk to:
//! - The controller driving sync, favorites and search (controller.rs)
//! - Derived in-memory views and their watch channels (views.rs)
//! - Broadcast notifications (events.rs)

pub mod controller;
pub mod events;
pub mod views;

pub use controller::{CatalogController, LoadOutcome, PageSummary};
pub use events::{CatalogEvent, EventBus};
pub use views::ViewSnapshot;
