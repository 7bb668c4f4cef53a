//! Storage implementations for the extraction library.
//!
//! Available backends:
//! - `MemoryStore` - In-memory storage (always available)
//!
//! Graph databases plug in by implementing `FindingStore` and `PersonStore`.

pub mod memory;

pub use memory::MemoryStore;
