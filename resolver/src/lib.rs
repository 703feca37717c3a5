//! Tiered route resolution: an in-process cache, a shared Redis tier and
//! the per-project authoritative stores, chained by [`Resolver`] with
//! read-through population and kept warm by [`sync::SyncTask`].

pub mod config;
pub mod local_cache;
pub mod metrics_defs;
pub mod resolve;
pub mod shared_cache;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testutils;

pub use local_cache::LocalCache;
pub use resolve::{ResolveError, Resolver};
