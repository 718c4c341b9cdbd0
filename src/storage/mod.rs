pub mod memory;

pub use memory::{get_json, put_json, CacheStore, MemoryStore, StoreError};
