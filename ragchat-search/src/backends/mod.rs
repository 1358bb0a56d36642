//! Search backend implementations.
//!
//! Only the in-process backend lives here; API- and database-backed
//! providers implement [`crate::backend::SearchBackend`] in the crates that
//! own their clients.

pub mod memory;

pub use memory::InMemoryBackend;
