//! Record id generation.

use std::sync::atomic::{AtomicU64, Ordering};

pub trait IdGenerator: Send + Sync + 'static {
    /// A fresh id, unique per generator, prefixed for readability.
    fn next_id(&self, prefix: &str) -> String;
}

/// Random v4 UUIDs: `task-3f2a...`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, uuid::Uuid::new_v4())
    }
}

/// Counter-based ids (`analysis-1`, `analysis-2`, ...) for reproducible tests.
/// The counter is shared across prefixes.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self, prefix: &str) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_ids_count_up() {
        let ids = SequentialIds::new();
        assert_eq!(ids.next_id("task"), "task-1");
        assert_eq!(ids.next_id("analysis"), "analysis-2");
    }

    #[test]
    fn uuid_ids_are_unique() {
        let a = UuidIds.next_id("report");
        let b = UuidIds.next_id("report");
        assert!(a.starts_with("report-"));
        assert_ne!(a, b);
    }
}
