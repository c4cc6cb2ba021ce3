pub mod ranking;
pub mod redis_index;

#[cfg(feature = "inmem")]
pub mod memory;

pub use ranking::rank_entries;
pub use redis_index::{IndexConfig, RedisScoreIndex};

#[cfg(feature = "inmem")]
pub use memory::InMemoryScoreIndex;
