//! Adapters shipped with xwrap

pub mod memory;

pub use memory::{
    MemoryAdapter, MemoryClient, MemoryError, MemoryHandle, MemorySettings, MemoryStats,
    MEMORY_ADAPTER,
};
