//! Shared error taxonomy for outbound ports.
//!
//! Every port in this workspace (object storage, document store, event bus,
//! key-store client) returns one of the variants below instead of a bespoke
//! error type per adapter. Core domain code matches on these kinds directly;
//! the HTTP edge of each service maps them to the `{exception_id, status,
//! data}` envelope described in spec.md §6/§7.

use std::panic::Location;

use tracing::error;

/// Log an error at CRITICAL severity with caller location and span trace,
/// the way the teacher's `crate::error::log` helper does for every
/// `try_!`-wrapped adapter call.
#[track_caller]
pub fn log_critical(source: &dyn std::error::Error) {
    let location = Location::caller();
    let span_trace = tracing_error::SpanTrace::capture();
    error!(
        target: "flp",
        critical = true,
        %location,
        error = %source,
        "span trace:\n{span_trace}"
    );
}

/// Errors surfaced by the object storage port (§4.1).
#[derive(Debug, thiserror::Error)]
pub enum ObjectStorageError {
    #[error("no in-progress multipart upload for {bucket_id}/{object_id}")]
    MultipartUploadNotFound { bucket_id: String, object_id: String },

    #[error("a multipart upload already exists for {bucket_id}/{object_id}")]
    MultipartUploadAlreadyExists { bucket_id: String, object_id: String },

    #[error("failed to abort multipart upload {upload_id} for {bucket_id}/{object_id}")]
    MultipartUploadAbortError {
        bucket_id: String,
        object_id: String,
        upload_id: String,
    },

    #[error("failed to confirm multipart upload completion for {bucket_id}/{object_id}")]
    MultipartUploadConfirmError { bucket_id: String, object_id: String },

    #[error("object {bucket_id}/{object_id} does not exist")]
    ObjectNotFound { bucket_id: String, object_id: String },

    #[error("object already exists at {bucket_id}/{object_id}")]
    ObjectAlreadyExists { bucket_id: String, object_id: String },

    #[error("storage alias '{alias}' is not configured")]
    UnknownStorageAlias { alias: String },

    #[error("transient error communicating with object storage: {0}")]
    Transient(String),
}

/// Errors surfaced by the document-store DAO port.
#[derive(Debug, thiserror::Error)]
pub enum DaoError {
    #[error("resource '{id}' not found in collection '{collection}'")]
    NotFound { collection: String, id: String },

    #[error("resource '{id}' already exists in collection '{collection}'")]
    AlreadyExists { collection: String, id: String },

    #[error("database communication error: {0}")]
    Transient(String),
}

/// Errors surfaced by the event-bus port (publish or subscribe side).
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("failed to publish to topic '{topic}' with key '{key}': {reason}")]
    PublishFailed {
        topic: String,
        key: String,
        reason: String,
    },

    #[error("malformed event payload on topic '{topic}': {reason}")]
    MalformedPayload { topic: String, reason: String },

    #[error("transient error communicating with the broker: {0}")]
    Transient(String),
}

/// Errors surfaced by the key-store (EKSS/Vault wrapper) HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("secret '{secret_id}' not found")]
    SecretNotFound { secret_id: String },

    #[error("key store responded with unexpected status {status}")]
    BadResponse { status: u16 },

    #[error("request to key store failed: {0}")]
    RequestFailed(String),
}

/// Errors surfaced by JWT/JWKS verification.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token is malformed or signature invalid: {0}")]
    InvalidToken(String),

    #[error("token claim '{claim}' does not match the requested resource")]
    ClaimMismatch { claim: String },

    #[error("no JWKS configured for issuer '{issuer}'")]
    UnknownIssuer { issuer: String },
}
