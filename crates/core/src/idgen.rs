// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Injectable id source. Intent ids and bubble instance ids must be opaque
//! and collision-resistant; tests substitute a deterministic sequence so
//! assertions can name exact ids.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

pub trait IdSource: Send + Sync {
    fn next_id(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdSource;

impl IdSource for UuidIdSource {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Deterministic id source for tests: `<prefix>-1`, `<prefix>-2`, ...
#[derive(Debug)]
pub struct SequentialIdSource {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialIdSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdSource for SequentialIdSource {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}", self.prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_ids_increment() {
        let gen = SequentialIdSource::new("intent");
        assert_eq!(gen.next_id(), "intent-1");
        assert_eq!(gen.next_id(), "intent-2");
    }

    #[test]
    fn uuid_ids_are_unique() {
        let gen = UuidIdSource;
        assert_ne!(gen.next_id(), gen.next_id());
    }
}
