//! Round-robin selection over read replicas.
//!
//! Discovery reads are spread across replicas to keep polling off the
//! primary. There is no fallback to the primary: a selector cannot be built
//! from an empty list, so selection itself never fails.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::database::StoreError;

/// Rotates through a fixed, non-empty set of replicas.
#[derive(Debug)]
pub struct ReplicaSelector<T> {
    replicas: Vec<T>,
    next: AtomicUsize,
}

impl<T> ReplicaSelector<T> {
    /// Builds a selector over `replicas`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NoReplicas` when the list is empty.
    pub fn new(replicas: Vec<T>) -> Result<Self, StoreError> {
        if replicas.is_empty() {
            return Err(StoreError::NoReplicas);
        }
        Ok(Self {
            replicas,
            next: AtomicUsize::new(0),
        })
    }

    /// Returns the replica at the current position and advances it.
    pub fn next(&self) -> &T {
        let len = self.replicas.len();
        let idx = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |i| Some((i + 1) % len))
            .unwrap_or(0);
        &self.replicas[idx % len]
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.replicas.iter()
    }
}
