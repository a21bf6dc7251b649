//! 存储模块
//!
//! 提供分层翻译缓存和 redb 持久层。

pub mod cache;
pub mod durable;

pub use cache::{CacheEntry, CacheKey, CacheStats, CacheTier, HierarchicalCache};
pub use durable::{DurableBound, DurableTier};
