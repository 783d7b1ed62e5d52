//! Object storage access for raw messages and the routing document.
//!
//! Two backends implement [`ObjectStore`]:
//! - `S3ObjectStore`: AWS S3 via `aws-sdk-s3`
//! - `InMemoryObjectStore`: process-local map, for tests and local replay

use std::collections::HashMap;

use aws_sdk_s3::Client as S3Client;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Errors from an object store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object s3://{bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    #[error("storage request for s3://{bucket}/{key} failed: {message}")]
    Backend {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("failed to read body of s3://{bucket}/{key}: {message}")]
    Body {
        bucket: String,
        key: String,
        message: String,
    },
}

/// Result of a size-limited object fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredObject {
    /// Object body, no larger than the requested limit
    Body(Vec<u8>),
    /// Object exceeds the limit; the body was not read
    TooLarge { size: u64 },
}

/// Bucket and key of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Read access to an object store.
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, refusing to read bodies larger than `max_bytes`.
    fn get_object<'a>(
        &'a self,
        location: &'a ObjectLocation,
        max_bytes: u64,
    ) -> BoxFuture<'a, Result<StoredObject, StorageError>>;
}

// =============================================================================
// S3
// =============================================================================

/// S3-backed object store.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    /// Build a client from the ambient AWS configuration (env, profile, IMDS).
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(S3Client::new(&config))
    }
}

impl ObjectStore for S3ObjectStore {
    fn get_object<'a>(
        &'a self,
        location: &'a ObjectLocation,
        max_bytes: u64,
    ) -> BoxFuture<'a, Result<StoredObject, StorageError>> {
        Box::pin(async move {
            info!(location = %location, "s3_get_object_start");

            let response = self
                .client
                .get_object()
                .bucket(&location.bucket)
                .key(&location.key)
                .send()
                .await
                .map_err(|e| {
                    let service_error = e.into_service_error();
                    if service_error.is_no_such_key() {
                        StorageError::NotFound {
                            bucket: location.bucket.clone(),
                            key: location.key.clone(),
                        }
                    } else {
                        StorageError::Backend {
                            bucket: location.bucket.clone(),
                            key: location.key.clone(),
                            message: service_error.to_string(),
                        }
                    }
                })?;

            let content_length = response
                .content_length()
                .and_then(|len| u64::try_from(len).ok())
                .unwrap_or(0);

            if content_length > max_bytes {
                warn!(
                    location = %location,
                    content_length = content_length,
                    max_bytes = max_bytes,
                    "s3_object_too_large"
                );
                return Ok(StoredObject::TooLarge {
                    size: content_length,
                });
            }

            let body = response
                .body
                .collect()
                .await
                .map_err(|e| StorageError::Body {
                    bucket: location.bucket.clone(),
                    key: location.key.clone(),
                    message: e.to_string(),
                })?
                .into_bytes()
                .to_vec();

            // ContentLength may be absent
            let size = body.len() as u64;
            if size > max_bytes {
                warn!(
                    location = %location,
                    body_length = size,
                    max_bytes = max_bytes,
                    "s3_object_too_large"
                );
                return Ok(StoredObject::TooLarge { size });
            }

            info!(
                location = %location,
                body_length = body.len(),
                "s3_get_object_complete"
            );

            Ok(StoredObject::Body(body))
        })
    }
}

// =============================================================================
// In-Memory
// =============================================================================

/// Object store backed by a process-local map.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, location: &ObjectLocation, body: impl Into<Vec<u8>>) {
        self.objects.write().await.insert(
            (location.bucket.clone(), location.key.clone()),
            body.into(),
        );
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn get_object<'a>(
        &'a self,
        location: &'a ObjectLocation,
        max_bytes: u64,
    ) -> BoxFuture<'a, Result<StoredObject, StorageError>> {
        Box::pin(async move {
            let objects = self.objects.read().await;
            let body = objects
                .get(&(location.bucket.clone(), location.key.clone()))
                .ok_or_else(|| StorageError::NotFound {
                    bucket: location.bucket.clone(),
                    key: location.key.clone(),
                })?;

            let size = body.len() as u64;
            if size > max_bytes {
                return Ok(StoredObject::TooLarge { size });
            }

            Ok(StoredObject::Body(body.clone()))
        })
    }
}
