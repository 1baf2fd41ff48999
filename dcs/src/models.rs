//! DRS object entities owned by the download controller (spec.md §3 "DrsObject
//! (AccessTimeDrsObject in DCS)"), grounded in
//! `original_source/dcs/core/models.py` and the field set `data_repository.py`
//! actually reads off `AccessTimeDrsObject`.

use chrono::{DateTime, Utc};
use flp_common::dao::Resource;
use serde::{Deserialize, Serialize};

/// The metadata needed to register a new DRS object, as carried by
/// `FileInternallyRegistered` (spec.md §4.5 `register_new_file`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrsObjectBase {
    pub file_id: String,
    pub decryption_secret_id: String,
    pub decrypted_sha256: String,
    pub decrypted_size: u64,
    pub encrypted_size: u64,
    pub s3_endpoint_alias: String,
    pub creation_date: DateTime<Utc>,
}

/// A registered DRS object. `file_id` is the accession string and doubles
/// as the document id; `object_id` is the permanent-bucket object key
/// reused by outbox copies (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrsObject {
    #[serde(rename = "_id")]
    pub file_id: String,
    pub object_id: String,
    pub decryption_secret_id: String,
    pub decrypted_sha256: String,
    pub decrypted_size: u64,
    pub encrypted_size: u64,
    pub s3_endpoint_alias: String,
    pub creation_date: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl Resource for DrsObject {
    type Id = String;
    fn id(&self) -> String {
        self.file_id.clone()
    }
}

impl DrsObject {
    pub fn from_base(base: DrsObjectBase, object_id: String, last_accessed: DateTime<Utc>) -> Self {
        Self {
            file_id: base.file_id,
            object_id,
            decryption_secret_id: base.decryption_secret_id,
            decrypted_sha256: base.decrypted_sha256,
            decrypted_size: base.decrypted_size,
            encrypted_size: base.encrypted_size,
            s3_endpoint_alias: base.s3_endpoint_alias,
            creation_date: base.creation_date,
            last_accessed,
        }
    }
}

/// DRS-compliant `AccessMethod` wrapper (`access_methods` field).
#[derive(Debug, Clone, Serialize)]
pub struct AccessMethod {
    pub access_url: AccessUrl,
    #[serde(rename = "type")]
    pub type_: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessUrl {
    pub url: String,
}

/// DRS-compliant `Checksum` wrapper (`checksums` field).
#[derive(Debug, Clone, Serialize)]
pub struct Checksum {
    pub checksum: String,
    #[serde(rename = "type")]
    pub type_: &'static str,
}

/// The body returned by `GET /ga4gh/drs/v1/objects/{object_id}` on success
/// (spec.md §4.5 `access_drs_object`).
#[derive(Debug, Clone, Serialize)]
pub struct DrsObjectResponse {
    pub access_methods: Vec<AccessMethod>,
    pub checksums: Vec<Checksum>,
    pub created_time: DateTime<Utc>,
    pub id: String,
    pub self_uri: String,
    pub size: u64,
}

impl DrsObject {
    pub fn into_response(self, self_uri: String, access_url: String) -> DrsObjectResponse {
        DrsObjectResponse {
            access_methods: vec![AccessMethod {
                access_url: AccessUrl { url: access_url },
                type_: "s3",
            }],
            checksums: vec![Checksum {
                checksum: self.decrypted_sha256,
                type_: "sha-256",
            }],
            created_time: self.creation_date,
            id: self.file_id,
            self_uri,
            size: self.encrypted_size,
        }
    }
}
