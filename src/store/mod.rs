pub mod cache_store;
pub mod lock;
pub mod memory;
pub mod records;
pub mod redis_store;

pub use cache_store::CacheStore;
pub use lock::{LockGuard, LockManager};
pub use memory::{ExpirySweeper, InMemoryCacheStore};
pub use records::RecordStore;
pub use redis_store::RedisCacheStore;
