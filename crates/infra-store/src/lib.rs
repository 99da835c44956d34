//! Persistence adapters for the store port.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;
