//! Batch loading: deduplicated, per-level entity fetches

pub mod coordinator;
pub mod fetcher;
pub mod in_memory;
pub mod key;

pub use coordinator::{BatchLoader, PendingLoad, TaskId};
pub use fetcher::{BatchFetcher, BatchResults, FetcherRegistry};
pub use in_memory::{FetchCall, InMemoryFetcher};
pub use key::BatchKey;
