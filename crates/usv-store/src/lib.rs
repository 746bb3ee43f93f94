// crates/usv-store/src/lib.rs
//
// usv-store: Storage layer for the Universal (USV) treasury protocol.
//
// Provides a RocksDB-backed durable state store with atomic batch commits,
// and an in-memory store with identical semantics for tests and ephemeral
// runs.

pub mod memory;
pub mod rocks;

// Re-export key types for ergonomic access from downstream crates.
pub use memory::MemoryStore;
pub use rocks::RocksStore;
