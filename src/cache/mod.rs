//! Download and local cache of dataset files

pub mod cache_manager;
pub mod fetch;
pub mod retry;

#[cfg(test)]
pub(crate) mod mock;

pub use cache_manager::{CacheEntry, CacheManager, CacheState, CacheStatus, DatasetUsage};
pub use fetch::{CancelToken, Fetcher, HttpFetcher};
pub use retry::RetryPolicy;
