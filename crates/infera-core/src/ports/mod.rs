//! Port definitions (trait abstractions) for external collaborators.
//!
//! # Design Rules
//!
//! - No concrete storage, HTTP or SDK types in any signature
//! - Implementations are injected at the composition root
//! - Test doubles implement the same traits

mod object_store;
mod process_store;
mod registry;

pub use object_store::{ByteStream, ObjectStoreError, ObjectStorePort};
pub use process_store::{NoopProcessStore, ProcessStorePort, StoreError};
pub use registry::{ArtifactRegistryPort, RegistryError};
