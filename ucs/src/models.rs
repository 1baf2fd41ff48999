//! Entities owned by the upload controller (spec.md §3 "UCS domain model"),
//! grounded in `original_source/services/ucs/src/ucs/core/models.py`.

use chrono::{DateTime, Utc};
use flp_common::dao::Resource;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named group of `FileUpload`s bound to one storage alias. Locking a box
/// is the signal that all of its uploads are final (spec.md §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUploadBox {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub storage_alias: String,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub file_count: u64,
    #[serde(default)]
    pub size: u64,
}

impl Resource for FileUploadBox {
    type Id = Uuid;
    fn id(&self) -> Uuid {
        self.id
    }
}

/// One file's upload record within a box, keyed by a server-assigned UUID
/// that doubles as the S3 object key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUpload {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub box_id: Uuid,
    pub alias: String,
    pub size: u64,
    pub checksum: String,
    #[serde(default)]
    pub completed: bool,
}

impl Resource for FileUpload {
    type Id = Uuid;
    fn id(&self) -> Uuid {
        self.id
    }
}

/// Bookkeeping for the S3 multipart upload backing one `FileUpload`. Never
/// exposed directly to clients; looked up by `file_id` on every part/complete
/// request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3UploadDetails {
    #[serde(rename = "_id")]
    pub file_id: Uuid,
    pub storage_alias: String,
    pub s3_upload_id: String,
    pub initiated: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
}

impl Resource for S3UploadDetails {
    type Id = Uuid;
    fn id(&self) -> Uuid {
        self.file_id
    }
}
