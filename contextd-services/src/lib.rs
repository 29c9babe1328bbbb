//! Per-data-type services (C6): memories, remediations, checkpoints, on top
//! of tenant isolation (C3) and the fallback/resilient storage stack
//! (C5/C4). Defines payload schemas, id derivation, confidence clamping,
//! and hybrid (semantic + lexical) search rerank (spec §4.6).

pub mod checkpoint;
pub mod confidence;
pub mod hybrid;
pub mod ids;
pub mod memory;
pub mod remediation;

pub use checkpoint::{CheckpointRecord, CheckpointService, CHECKPOINTS_COLLECTION};
pub use memory::{MemoryHit, MemoryRecord, MemoryService, MemoryState, Outcome, MEMORIES_COLLECTION};
pub use remediation::{RemediationHit, RemediationRecord, RemediationService, REMEDIATIONS_COLLECTION};
