//! Result cache module
//!
//! - `bounded`: LRU core with entry-count and byte budgets and lazy TTL
//! - `result_cache`: namespaced, typed wrapper shared across requests

pub mod bounded;
pub mod result_cache;

pub use bounded::{BoundedCache, CacheEntry, CacheStats};
pub use result_cache::{Namespace, ResultCache};
