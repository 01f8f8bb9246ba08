//! A two-tier cache for remote binary resources, built for media UIs that
//! render artwork fetched over HTTP.
//!
//! # Overview
//!
//! The cache is organized in two tiers plus the network behind them:
//!
//! - an in-memory tier ([`memory::MemoryCache`]) holding decoded resources,
//!   with LRU eviction under optional count and total-cost budgets,
//! - an on-disk tier ([`disk::DiskCache`]) holding encoded bytes, one file
//!   per key, surviving restarts,
//! - a per-key fetch coordinator ([`coordinator::FetchCoordinator`])
//!   guaranteeing at most one network request per resource at any instant,
//!   however many callers are waiting.
//!
//! [`ResourceCache`] is the facade over all three: synchronous memory-only
//! lookups for hot paths, and an async [`fetch`](ResourceCache::fetch) that
//! falls through memory, disk, then network, promoting hits upward and
//! writing network results through both tiers. A [`ResourceCodec`]
//! translates between stored bytes and the host's resource type; keys are
//! derived from resource URLs by [`ResourceKey::from_locator`].
//!
//! Failures deliberately never reach callers as errors: a resource either
//! materializes or it does not, and the cache records why. Consumers can
//! drop their interest at any time without cancelling the shared fetch;
//! [`ResourceBinding`] packages those rules for one UI slot at a time.

#[macro_use]
pub mod metrics;

pub mod binding;
pub mod cache;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod disk;
pub mod download;
pub mod error;
pub mod key;
pub mod memory;
mod utils;

pub use binding::{BindingState, ResourceBinding};
pub use cache::{CacheUsage, ResourceCache};
pub use codec::{BlobCodec, ResourceCodec};
pub use config::CacheConfig;
pub use error::{CacheContents, CacheError};
pub use key::ResourceKey;
