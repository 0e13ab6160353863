//! Storage Module
//!
//! Durable tier: the storage backend seam, the production file backend
//! with atomic replace semantics, and the concurrency gate bounding
//! simultaneous mutations.

mod backend;
mod file;
mod gate;

pub use backend::{MemoryBackend, StorageBackend};
pub use file::FileBackend;
pub use gate::ConcurrencyGate;
