mod memory_pool;

pub use memory_pool::{BlockInTransit, MemoryPool, MAX_MEMPOOL_SIZE};
