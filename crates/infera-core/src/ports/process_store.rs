//! Durable storage for process records.

use thiserror::Error;

use crate::domain::ProcessRecord;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("failed to read process state: {0}")]
    Read(String),
    #[error("failed to write process state: {0}")]
    Write(String),
}

/// Port for persisting the full set of process records.
///
/// `save` overwrites the stored set wholesale and must be atomic from the
/// caller's point of view: a reader never observes a partially written set.
pub trait ProcessStorePort: Send + Sync {
    /// Load every persisted record. A missing store yields an empty list.
    fn load(&self) -> Result<Vec<ProcessRecord>, StoreError>;

    /// Replace the persisted set with `records`.
    fn save(&self, records: &[ProcessRecord]) -> Result<(), StoreError>;
}

/// Store that keeps nothing. For tests and one-shot CLI invocations.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProcessStore;

impl ProcessStorePort for NoopProcessStore {
    fn load(&self) -> Result<Vec<ProcessRecord>, StoreError> {
        Ok(Vec::new())
    }

    fn save(&self, _records: &[ProcessRecord]) -> Result<(), StoreError> {
        Ok(())
    }
}
