//! In-process, filesystem-backed `VectorStore` implementation (C2).
//!
//! One directory per collection, one file per document, brute-force
//! cosine scan on search. Every write lands via [`atomic::write_atomic`]
//! so a crash mid-write never leaves a partially-written document visible
//! to a subsequent read.

pub mod atomic;
pub mod codec;
pub mod layout;
mod store;

pub use store::EmbeddedVectorStore;
