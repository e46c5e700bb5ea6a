//! # storage: object-store contract used by the snapshot loop
//!
//! The loop only ever sees a [`Bucket`]: an authenticated, resolved container
//! that accepts one streamed object at a time. The Backblaze B2 implementation
//! lives in [`b2`]; tests substitute `MockBucket`.
//!
//! Every call takes the process-wide [`CancellationToken`] and must return
//! [`StorageError::Cancelled`] promptly once it fires.

pub mod b2;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use tokio_util::sync::CancellationToken;

use crate::error::StorageError;

pub use b2::{B2Bucket, B2Session};

/// Chunks of an object body as they arrive from the source.
pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// A streamed object body with its length, when the source announced one.
pub struct ObjectBody {
    pub stream: ByteStream,
    pub content_length: Option<u64>,
}

impl ObjectBody {
    /// Body backed by a single in-memory buffer.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let content_length = Some(data.len() as u64);
        Self {
            stream: Box::pin(futures::stream::once(async move { Ok(data) })),
            content_length,
        }
    }
}

/// Represents one object to be written into the bucket.
pub struct NewObject {
    /// Object key, e.g. `2024-05-01T12:00:00.jpg`.
    pub name: String,
    pub content_type: &'static str,
    pub body: ObjectBody,
}

/// What the provider reports after an object was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub file_id: String,
    pub file_name: String,
    pub content_length: u64,
}

/// A resolved bucket that objects can be written to.
///
/// Implementations are shared read-only by the loop for the whole process
/// lifetime; any internal caching must be safe behind `&self`.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Streams `object` into the bucket. Overwrites an existing object of the
    /// same name. A failed or cancelled call leaves no completed object.
    async fn put_object(
        &self,
        object: NewObject,
        cancel: &CancellationToken,
    ) -> Result<StoredObject, StorageError>;
}
