//! The object-store client seam.
//!
//! The upload stream never talks to a store directly: it drives an
//! [`ObjectStoreClient`], which owns authentication, transport and the wire
//! protocol. [`MultipartStoreClient`] implements it for every backend of the
//! `object_store` crate.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreError;

pub mod multipart;

pub use multipart::MultipartStoreClient;

/// Where the finished object will live.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Destination {
    pub bucket: String,
    pub key: String,
}

impl Destination {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Handle of an open multipart upload, as returned by `begin_upload`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionToken {
    destination: Destination,
    upload_id: String,
}

impl SessionToken {
    pub fn new(destination: Destination, upload_id: impl Into<String>) -> Self {
        Self {
            destination,
            upload_id: upload_id.into(),
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.destination, self.upload_id)
    }
}

/// A part as listed in the finalize call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    /// Opaque confirmation the store returned for this part, e.g. an ETag
    pub integrity_tag: String,
}

/// What the store reports once the object is visible.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompletedObject {
    pub e_tag: Option<String>,
    pub version: Option<String>,
}

/// Final description of an uploaded object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub destination: Destination,
    pub e_tag: Option<String>,
    pub version: Option<String>,
    /// Total object size in bytes
    pub size: u64,
    pub part_count: usize,
}

/// The four calls a multipart upload needs from an object store.
///
/// Implementations classify their failures into [`StoreError`]; only
/// [`StoreError::Transient`] is retried by the caller.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn begin_upload(&self, destination: &Destination) -> Result<SessionToken, StoreError>;

    /// Upload one part and return its integrity tag. `part_number` starts at 1.
    async fn upload_part(
        &self,
        token: &SessionToken,
        part_number: u32,
        payload: Bytes,
    ) -> Result<String, StoreError>;

    /// Finalize the upload. `parts` is sorted by ascending part number.
    async fn complete_upload(
        &self,
        token: &SessionToken,
        parts: Vec<CompletedPart>,
    ) -> Result<CompletedObject, StoreError>;

    async fn abort_upload(&self, token: &SessionToken) -> Result<(), StoreError>;
}
