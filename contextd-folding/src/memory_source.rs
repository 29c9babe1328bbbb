//! Seam for injecting relevant memories into a freshly created branch
//! (spec §4.8.2: "may optionally receive an injection of relevant
//! memories (from C6) capped at a configurable fraction of its budget").
//!
//! Kept as a small trait rather than a direct dependency on
//! `contextd-services`, the same decoupling `contextd-distiller::LlmClient`
//! uses for its external call-out — `contextd-server` is where a real
//! `MemoryService`-backed implementation is wired in.

/// One memory candidate for injection, already token-costed by the
/// source (the folding runtime has no tokenizer of its own and never
/// estimates text length itself).
#[derive(Debug, Clone)]
pub struct InjectedMemory {
    pub content: String,
    pub tokens: u64,
}

/// Supplies memories relevant to a branch's prompt, for injection into
/// its context at creation time.
pub trait MemorySource: Send + Sync {
    /// Return candidate memories relevant to `query`, in priority order.
    /// The caller (the folding runtime) is responsible for stopping once
    /// the injected token budget is spent — this may over-return.
    fn relevant_memories(&self, query: &str) -> Vec<InjectedMemory>;
}

/// Default no-op source: no memories are ever injected. Branches still
/// work exactly as before this feature existed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMemoryInjection;

impl MemorySource for NoMemoryInjection {
    fn relevant_memories(&self, _query: &str) -> Vec<InjectedMemory> {
        Vec::new()
    }
}

/// Default fraction of a branch's budget available for injected memory
/// context (spec §4.8.2: "default 20%").
pub const DEFAULT_INJECTION_FRACTION: f32 = 0.20;

/// Select memories from `candidates` greedily until `cap_tokens` would be
/// exceeded, preserving the source's priority order.
#[must_use]
pub fn select_within_budget(candidates: Vec<InjectedMemory>, cap_tokens: u64) -> Vec<InjectedMemory> {
    let mut selected = Vec::new();
    let mut spent = 0u64;
    for candidate in candidates {
        let next = spent.saturating_add(candidate.tokens);
        if next > cap_tokens {
            continue;
        }
        spent = next;
        selected.push(candidate);
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_op_source_injects_nothing() {
        assert!(NoMemoryInjection.relevant_memories("anything").is_empty());
    }

    #[test]
    fn selection_stops_at_cap_but_skips_ahead_for_smaller_items() {
        let candidates = vec![
            InjectedMemory { content: "a".into(), tokens: 50 },
            InjectedMemory { content: "b".into(), tokens: 60 },
            InjectedMemory { content: "c".into(), tokens: 10 },
        ];
        let selected = select_within_budget(candidates, 60);
        let contents: Vec<&str> = selected.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "c"]);
    }
}
