//! FIS domain types, grounded in `original_source/services/fis/src/fis/core`
//! (ingest.py's `EncryptedPayload`/`UploadMetadata` and interrogation.py's
//! `FileUnderInterrogation`/`InterrogationReport`/`FileUploadState`), with
//! the federated/legacy metadata split taken from
//! `original_source/src/fis/adapters/inbound/fastapi_/routes.py`, which is
//! the only captured copy of the three-route (`/legacy/ingest`,
//! `/federated/ingest_metadata`, `/federated/ingest_secret`) shape.

use chrono::{DateTime, Utc};
use flp_common::dao::Resource;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A Crypt4GH-encrypted envelope addressed to this service's keypair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Base64-encoded Crypt4GH envelope bytes.
    pub payload: String,
}

/// Decrypted upload metadata for the federated (non-legacy) ingest path
/// (spec.md §4.3). The federated payload never carries the raw file
/// secret: a prior call to `/federated/ingest_secret` deposits it and
/// mints this `secret_id`, which metadata ingest only references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub file_id: Uuid,
    pub object_id: String,
    pub part_size: u64,
    pub unencrypted_size: u64,
    pub encrypted_size: u64,
    pub secret_id: String,
    pub encrypted_parts_md5: Vec<String>,
    pub encrypted_parts_sha256: Vec<String>,
    pub unencrypted_checksum: String,
    pub storage_alias: String,
}

/// Decrypted payload for `/federated/ingest_secret`: just the raw file
/// secret, submitted separately from its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptedSecret {
    pub file_secret: String,
}

/// Decrypted upload metadata for the legacy ingest path, kept alongside the
/// federated shape per spec.md §2's "both ingest shapes are kept".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyUploadMetadata {
    pub file_id: Uuid,
    pub object_id: String,
    pub part_size: u64,
    pub unencrypted_size: u64,
    pub encrypted_size: u64,
    pub file_secret: String,
    pub encrypted_md5_checksums: Vec<String>,
    pub encrypted_sha256_checksums: Vec<String>,
    pub unencrypted_checksum: String,
}

/// Marker row recording that a file's metadata has already been processed
/// (dedup guard for `populate_by_event`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileIdRecord {
    #[serde(rename = "_id")]
    pub file_id: Uuid,
}

impl Resource for FileIdRecord {
    type Id = Uuid;
    fn id(&self) -> Uuid {
        self.file_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileUploadState {
    Init,
    Inbox,
    Interrogated,
    AwaitingArchival,
    Archived,
    Cancelled,
    Failed,
}

/// Tracks the lifecycle of one file as it passes through interrogation,
/// mirrored 1:1 from `FileUnderInterrogation` in interrogation.py.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUnderInterrogation {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub data_hub: String,
    pub state: FileUploadState,
    pub state_updated: DateTime<Utc>,
    pub interrogated: bool,
    pub can_remove: bool,
}

impl Resource for FileUnderInterrogation {
    type Id = Uuid;
    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseFileInformation {
    pub id: Uuid,
    pub data_hub: String,
}

/// Inbound report from a data hub's interrogation worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterrogationReport {
    pub file_id: Uuid,
    pub storage_alias: String,
    pub interrogated_at: DateTime<Utc>,
    pub passed: bool,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub encrypted_parts_md5: Vec<String>,
    #[serde(default)]
    pub encrypted_parts_sha256: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
}
