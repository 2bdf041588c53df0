//! Object-store capability port.
//!
//! The download coordinator depends only on `head_object` and `get_object`;
//! the concrete SDK client is supplied at construction.

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use std::pin::Pin;
use thiserror::Error;

/// Streamed object body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ObjectStoreError>> + Send>>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ObjectStoreError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("object store request failed: {0}")]
    Request(String),
}

/// Minimal object-store client surface.
#[async_trait]
pub trait ObjectStorePort: Send + Sync {
    /// Size of the object in bytes.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<u64, ObjectStoreError>;

    /// Open the object body as a byte stream.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, ObjectStoreError>;
}
