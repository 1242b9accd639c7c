//! [`ObjectStoreClient`] backed by an `object_store` [`MultipartStore`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::multipart::{MultipartStore, PartId};
use object_store::path::Path;
use object_store::PutPayload;

use super::{CompletedObject, CompletedPart, Destination, ObjectStoreClient, SessionToken};
use crate::error::StoreError;

/// Drives multipart uploads through any store implementing [`MultipartStore`]
/// (S3, GCS, Azure, in-memory).
///
/// An `object_store` client is bound to a single bucket, so destinations
/// naming another bucket are reported as not found.
pub struct MultipartStoreClient {
    store: Arc<dyn MultipartStore>,
    bucket: String,
}

impl MultipartStoreClient {
    pub fn new(store: Arc<dyn MultipartStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStoreClient for MultipartStoreClient {
    async fn begin_upload(&self, destination: &Destination) -> Result<SessionToken, StoreError> {
        if destination.bucket != self.bucket {
            return Err(StoreError::NotFound {
                message: format!(
                    "bucket {} is not served by this client (bound to {})",
                    destination.bucket, self.bucket
                ),
            });
        }
        let path = object_path(destination)?;
        let upload_id = self
            .store
            .create_multipart(&path)
            .await
            .map_err(classify)?;

        Ok(SessionToken::new(destination.clone(), upload_id))
    }

    async fn upload_part(
        &self,
        token: &SessionToken,
        part_number: u32,
        payload: Bytes,
    ) -> Result<String, StoreError> {
        let path = object_path(token.destination())?;
        let part_idx = part_index(part_number)?;
        let part = self
            .store
            .put_part(
                &path,
                &token.upload_id().to_string(),
                part_idx,
                PutPayload::from(payload),
            )
            .await
            .map_err(classify)?;

        Ok(part.content_id)
    }

    async fn complete_upload(
        &self,
        token: &SessionToken,
        parts: Vec<CompletedPart>,
    ) -> Result<CompletedObject, StoreError> {
        let path = object_path(token.destination())?;
        let parts = parts
            .into_iter()
            .map(|part| PartId {
                content_id: part.integrity_tag,
            })
            .collect();
        let result = self
            .store
            .complete_multipart(&path, &token.upload_id().to_string(), parts)
            .await
            .map_err(|err| match classify(err) {
                StoreError::Permanent { message } => StoreError::Validation { message },
                other => other,
            })?;

        Ok(CompletedObject {
            e_tag: result.e_tag,
            version: result.version,
        })
    }

    async fn abort_upload(&self, token: &SessionToken) -> Result<(), StoreError> {
        let path = object_path(token.destination())?;
        self.store
            .abort_multipart(&path, &token.upload_id().to_string())
            .await
            .map_err(classify)
    }
}

fn object_path(destination: &Destination) -> Result<Path, StoreError> {
    Path::parse(&destination.key).map_err(|err| StoreError::Permanent {
        message: format!("invalid object key {:?}: {}", destination.key, err),
    })
}

/// `object_store` numbers parts from zero.
fn part_index(part_number: u32) -> Result<usize, StoreError> {
    match part_number.checked_sub(1) {
        Some(idx) => Ok(idx as usize),
        None => Err(StoreError::permanent("part numbers start at 1")),
    }
}

/// Sort an `object_store` error into the upload taxonomy.
///
/// The HTTP backends retry timeouts and 5xx responses themselves and report
/// both exhausted retries and rejected requests as `Generic`, so nothing
/// coming out of them is retried again here.
fn classify(err: object_store::Error) -> StoreError {
    let message = err.to_string();
    match err {
        object_store::Error::NotFound { .. } => StoreError::NotFound { message },
        object_store::Error::Unauthenticated { .. }
        | object_store::Error::PermissionDenied { .. } => StoreError::Auth { message },
        _ => StoreError::Permanent { message },
    }
}
