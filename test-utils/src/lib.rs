//! Shared test fixtures for the ContextD workspace: scratch embedded
//! stores, seeded embeddings, and fixed-time helpers, kept out of each
//! crate's own `#[cfg(test)]` modules so they aren't duplicated.

pub mod clock;
pub mod embeddings;
pub mod store;

pub use clock::fixed_time;
pub use embeddings::seeded_vector;
pub use store::{temp_embedded_store, test_tenant};
