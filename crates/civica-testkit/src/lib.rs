//! Testing utilities for the Civica access engine.
//!
//! Seeded worlds over both storage backends, and proptest strategies for
//! the engine's value types. Intended for this workspace's own tests and
//! for embedders writing integration tests against the engine.

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    bootstrap_actor, config, memory_engine, seed, sqlite_engine, unique_handle, SeededWorld,
    ROOT_HANDLE,
};
