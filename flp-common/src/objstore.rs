//! Object storage abstraction (spec.md §4.1).
//!
//! `ObjectStorage` is the uniform interface over a single S3-compatible
//! endpoint; `StorageRegistry` resolves a *storage alias* to the
//! `(bucket_id, ObjectStorage)` pair that every core domain method needs.
//! The shape mirrors the teacher's `BlobStore` trait
//! (`crates/teacher_gateway/src/blob_store.rs`) generalized from a single
//! writer method to the full multipart/copy/list surface the pipeline
//! needs, and the concrete adapter reuses the teacher's `S3Client`
//! construction from `s3_client.rs` almost verbatim.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials, Region};
use serde::Deserialize;

use crate::error::ObjectStorageError as Error;

#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync + std::fmt::Debug {
    /// Create a new multipart upload. Fails with
    /// `MultipartUploadAlreadyExists` if one is already in progress for the
    /// same key (crash-recovery idempotence, spec.md §4.1/§4.2).
    async fn init_multipart(&self, bucket_id: &str, object_id: &str) -> Result<String, Error>;

    /// Presigned PUT URL for one part of an in-progress multipart upload.
    async fn part_upload_url(
        &self,
        upload_id: &str,
        bucket_id: &str,
        object_id: &str,
        part_no: i32,
    ) -> Result<String, Error>;

    /// Complete a multipart upload. Callers must treat `ObjectNotFound`
    /// combined with `does_object_exist() == true` as success (crash
    /// between S3 completion and the DB write).
    async fn complete_multipart(
        &self,
        upload_id: &str,
        bucket_id: &str,
        object_id: &str,
    ) -> Result<(), Error>;

    /// Abort a multipart upload. `MultipartUploadNotFound` must be
    /// swallowed by callers (already aborted).
    async fn abort_multipart(
        &self,
        upload_id: &str,
        bucket_id: &str,
        object_id: &str,
    ) -> Result<(), Error>;

    async fn get_object_size(&self, bucket_id: &str, object_id: &str) -> Result<i64, Error>;

    async fn does_object_exist(&self, bucket_id: &str, object_id: &str) -> Result<bool, Error>;

    async fn delete_object(&self, bucket_id: &str, object_id: &str) -> Result<(), Error>;

    /// Copy across buckets (same or different storage alias). Callers must
    /// treat `ObjectAlreadyExists` at the destination as a no-op.
    async fn copy_object(
        &self,
        src_bucket_id: &str,
        src_object_id: &str,
        dst_bucket_id: &str,
        dst_object_id: &str,
    ) -> Result<(), Error>;

    async fn presigned_download_url(
        &self,
        bucket_id: &str,
        object_id: &str,
        expires_after: Duration,
    ) -> Result<String, Error>;

    async fn list_all_object_ids(&self, bucket_id: &str) -> Result<Vec<String>, Error>;
}

/// Connection + credential details for one storage alias, as laid out in
/// spec.md §6's "storage aliases map" configuration entry.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageEndpoint {
    pub bucket: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug)]
pub struct S3ObjectStorage {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStorage {
    pub async fn new(endpoint: &StorageEndpoint) -> Self {
        let credentials = Credentials::new(
            endpoint.access_key.clone(),
            endpoint.secret_key.clone(),
            None,
            None,
            "flp-config",
        );
        let config = S3ConfigBuilder::new()
            .behavior_version(BehaviorVersion::v2023_11_09())
            .endpoint_url(&endpoint.endpoint)
            .credentials_provider(credentials)
            .region(Region::new(endpoint.region.clone().unwrap_or_else(|| "auto".into())))
            .force_path_style(true)
            .build();
        Self {
            client: aws_sdk_s3::Client::from_conf(config),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStorage for S3ObjectStorage {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn init_multipart(&self, bucket_id: &str, object_id: &str) -> Result<String, Error> {
        // Detect an in-progress upload for the same key before creating a new
        // one: s3_upload_id assignment is not idempotent on S3's side.
        let existing = self
            .client
            .list_multipart_uploads()
            .bucket(bucket_id)
            .prefix(object_id)
            .send()
            .await
            .map_err(|err| transient(err))?;
        if existing
            .uploads()
            .iter()
            .any(|u| u.key() == Some(object_id))
        {
            return Err(Error::MultipartUploadAlreadyExists {
                bucket_id: bucket_id.to_string(),
                object_id: object_id.to_string(),
            });
        }

        let res = self
            .client
            .create_multipart_upload()
            .bucket(bucket_id)
            .key(object_id)
            .send()
            .await
            .map_err(|err| transient(err))?;
        res.upload_id()
            .map(str::to_string)
            .ok_or_else(|| Error::Transient("missing upload_id in response".into()))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn part_upload_url(
        &self,
        upload_id: &str,
        bucket_id: &str,
        object_id: &str,
        part_no: i32,
    ) -> Result<String, Error> {
        let presigning = aws_sdk_s3::presigning::PresigningConfig::expires_in(Duration::from_secs(3600))
            .map_err(|err| Error::Transient(err.to_string()))?;
        let presigned = self
            .client
            .upload_part()
            .bucket(bucket_id)
            .key(object_id)
            .upload_id(upload_id)
            .part_number(part_no)
            .presigned(presigning)
            .await
            .map_err(|err| {
                if format!("{err}").to_lowercase().contains("no such upload") {
                    Error::MultipartUploadNotFound {
                        bucket_id: bucket_id.to_string(),
                        object_id: object_id.to_string(),
                    }
                } else {
                    transient(err)
                }
            })?;
        Ok(presigned.uri().to_string())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn complete_multipart(
        &self,
        upload_id: &str,
        bucket_id: &str,
        object_id: &str,
    ) -> Result<(), Error> {
        let parts = self
            .client
            .list_parts()
            .bucket(bucket_id)
            .key(object_id)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|err| {
                if format!("{err}").to_lowercase().contains("no such upload") {
                    Error::MultipartUploadNotFound {
                        bucket_id: bucket_id.to_string(),
                        object_id: object_id.to_string(),
                    }
                } else {
                    transient(err)
                }
            })?;

        let completed_parts: Vec<_> = parts
            .parts()
            .iter()
            .map(|p| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .set_e_tag(p.e_tag().map(str::to_string))
                    .set_part_number(p.part_number())
                    .build()
            })
            .collect();

        let result = self
            .client
            .complete_multipart_upload()
            .bucket(bucket_id)
            .key(object_id)
            .upload_id(upload_id)
            .multipart_upload(
                aws_sdk_s3::types::CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await;

        if let Err(err) = result {
            if self.does_object_exist(bucket_id, object_id).await.unwrap_or(false) {
                return Ok(());
            }
            let error = Error::MultipartUploadConfirmError {
                bucket_id: bucket_id.to_string(),
                object_id: object_id.to_string(),
            };
            crate::error::log_critical(&anyhow::anyhow!("{err}"));
            return Err(error);
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn abort_multipart(
        &self,
        upload_id: &str,
        bucket_id: &str,
        object_id: &str,
    ) -> Result<(), Error> {
        match self
            .client
            .abort_multipart_upload()
            .bucket(bucket_id)
            .key(object_id)
            .upload_id(upload_id)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                if format!("{err}").to_lowercase().contains("no such upload") {
                    return Err(Error::MultipartUploadNotFound {
                        bucket_id: bucket_id.to_string(),
                        object_id: object_id.to_string(),
                    });
                }
                let error = Error::MultipartUploadAbortError {
                    bucket_id: bucket_id.to_string(),
                    object_id: object_id.to_string(),
                    upload_id: upload_id.to_string(),
                };
                crate::error::log_critical(&anyhow::anyhow!("{err}"));
                Err(error)
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_object_size(&self, bucket_id: &str, object_id: &str) -> Result<i64, Error> {
        let head = self
            .client
            .head_object()
            .bucket(bucket_id)
            .key(object_id)
            .send()
            .await
            .map_err(|_| Error::ObjectNotFound {
                bucket_id: bucket_id.to_string(),
                object_id: object_id.to_string(),
            })?;
        Ok(head.content_length().unwrap_or_default())
    }

    async fn does_object_exist(&self, bucket_id: &str, object_id: &str) -> Result<bool, Error> {
        Ok(self.get_object_size(bucket_id, object_id).await.is_ok())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_object(&self, bucket_id: &str, object_id: &str) -> Result<(), Error> {
        self.client
            .delete_object()
            .bucket(bucket_id)
            .key(object_id)
            .send()
            .await
            .map_err(|err| transient(err))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn copy_object(
        &self,
        src_bucket_id: &str,
        src_object_id: &str,
        dst_bucket_id: &str,
        dst_object_id: &str,
    ) -> Result<(), Error> {
        if self.does_object_exist(dst_bucket_id, dst_object_id).await? {
            return Err(Error::ObjectAlreadyExists {
                bucket_id: dst_bucket_id.to_string(),
                object_id: dst_object_id.to_string(),
            });
        }
        if !self.does_object_exist(src_bucket_id, src_object_id).await? {
            return Err(Error::ObjectNotFound {
                bucket_id: src_bucket_id.to_string(),
                object_id: src_object_id.to_string(),
            });
        }
        self.client
            .copy_object()
            .bucket(dst_bucket_id)
            .key(dst_object_id)
            .copy_source(format!("{src_bucket_id}/{src_object_id}"))
            .send()
            .await
            .map_err(|err| transient(err))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn presigned_download_url(
        &self,
        bucket_id: &str,
        object_id: &str,
        expires_after: Duration,
    ) -> Result<String, Error> {
        let presigning = aws_sdk_s3::presigning::PresigningConfig::expires_in(expires_after)
            .map_err(|err| Error::Transient(err.to_string()))?;
        let presigned = self
            .client
            .get_object()
            .bucket(bucket_id)
            .key(object_id)
            .presigned(presigning)
            .await
            .map_err(|_| Error::ObjectNotFound {
                bucket_id: bucket_id.to_string(),
                object_id: object_id.to_string(),
            })?;
        Ok(presigned.uri().to_string())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_all_object_ids(&self, bucket_id: &str) -> Result<Vec<String>, Error> {
        let mut ids = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut req = self.client.list_objects_v2().bucket(bucket_id);
            if let Some(token) = continuation.take() {
                req = req.continuation_token(token);
            }
            let page = req.send().await.map_err(|err| transient(err))?;
            ids.extend(page.contents().iter().filter_map(|o| o.key().map(str::to_string)));
            if page.is_truncated().unwrap_or(false) {
                continuation = page.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }
        Ok(ids)
    }
}

fn transient<E: std::fmt::Debug>(err: E) -> Error {
    Error::Transient(format!("{err:?}"))
}

/// Resolves storage aliases to `(bucket_id, &dyn ObjectStorage)` pairs.
/// Lookup by an unknown alias is a configuration fault, logged CRITICAL at
/// the call site (spec.md §4.1).
#[derive(Clone)]
pub struct StorageRegistry {
    aliases: Arc<HashMap<String, (String, Arc<dyn ObjectStorage>)>>,
}

impl StorageRegistry {
    pub fn new(aliases: HashMap<String, (String, Arc<dyn ObjectStorage>)>) -> Self {
        Self {
            aliases: Arc::new(aliases),
        }
    }

    #[track_caller]
    pub fn for_alias(&self, alias: &str) -> Result<(String, Arc<dyn ObjectStorage>), Error> {
        self.aliases.get(alias).cloned().ok_or_else(|| {
            let err = Error::UnknownStorageAlias {
                alias: alias.to_string(),
            };
            crate::error::log_critical(&err);
            err
        })
    }
}
