//! IFRS domain types, grounded in
//! `original_source/services/ifrs/src/ifrs/core/models.py` (via
//! `file_registry.py`'s usage).

use flp_common::dao::Resource;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fully registered file's permanent metadata — the authoritative record
/// for this file in the whole pipeline (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub accession: String,
    pub bucket_id: String,
    pub storage_alias: String,
    pub decrypted_sha256: String,
    pub encrypted_size: u64,
    pub unencrypted_size: u64,
}

impl Resource for FileMetadata {
    type Id = Uuid;
    fn id(&self) -> Uuid {
        self.id
    }
}

/// A `FileUploadValidationSuccess` projection waiting for its accession to
/// arrive (spec.md §4.4's two-sided join).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingFileUpload {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub bucket_id: String,
    pub storage_alias: String,
    pub decrypted_sha256: String,
    pub encrypted_size: u64,
    pub unencrypted_size: u64,
}

impl Resource for PendingFileUpload {
    type Id = Uuid;
    fn id(&self) -> Uuid {
        self.id
    }
}

/// An accession that arrived before its matching upload (the other half of
/// the join).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileIdToAccession {
    #[serde(rename = "_id")]
    pub file_id: Uuid,
    pub accession: String,
}

impl Resource for FileIdToAccession {
    type Id = Uuid;
    fn id(&self) -> Uuid {
        self.file_id
    }
}
