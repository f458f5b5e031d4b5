//! Remote photo listing
//!
//! Stateless page fetches over HTTP. No caching and no retries live here;
//! what happens on failure is the sync layer's decision.

pub mod feed;

pub use feed::{HttpFeed, RemoteFeed};
