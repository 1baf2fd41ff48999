//! FIS REST surface: legacy and federated ingest, plus the interrogation
//! report/listing endpoints, grounded in
//! `original_source/services/fis/src/fis/adapters/inbound/fastapi_` routes
//! referenced by spec.md §4.3/§6.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use flp_common::auth::{verify_data_hub_token, DataHubClaims, JwksCache};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::core::{InterrogationHandler, UploadMetadataProcessor};
use crate::error::{IngestError, InterrogationError};
use crate::models::{EncryptedPayload, InterrogationReport};

#[derive(Clone)]
pub struct AppState {
    pub ingest: Arc<UploadMetadataProcessor>,
    pub interrogation: Arc<InterrogationHandler>,
    pub issuer_keys: JwksCache,
}

/// Every route here is called by a data hub's own upload client, not an
/// end user, so the bearer token only needs to identify *which* hub is
/// calling (spec.md §6 "JWT-per-data-hub"), unlike UCS/DCS's work-order
/// tokens which additionally bind to a specific resource.
async fn authorize_data_hub(state: &AppState, headers: &HeaderMap) -> Result<DataHubClaims, ApiError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    verify_data_hub_token(token, &state.issuer_keys).await.map_err(|_| ApiError::Unauthorized)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/legacy/ingest", post(legacy_ingest))
        .route("/federated/ingest_metadata", post(ingest_metadata))
        .route("/federated/ingest_secret", post(ingest_secret))
        .route("/interrogations", post(interrogation_report))
        .route("/interrogations/:data_hub", get(list_uninterrogated))
        .route("/health", get(|| async { StatusCode::OK }))
        .with_state(state)
}

async fn legacy_ingest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<EncryptedPayload>,
) -> Result<StatusCode, ApiError> {
    authorize_data_hub(&state, &headers).await?;
    let metadata = state.ingest.decrypt_legacy_payload(&payload)?;
    if state.ingest.has_already_been_processed(metadata.file_id).await? {
        return Ok(StatusCode::NO_CONTENT);
    }
    let secret_id = state.ingest.store_secret(&metadata.file_secret).await?;
    let upload_metadata = crate::models::UploadMetadata {
        file_id: metadata.file_id,
        object_id: metadata.object_id,
        part_size: metadata.part_size,
        unencrypted_size: metadata.unencrypted_size,
        encrypted_size: metadata.encrypted_size,
        secret_id: secret_id.clone(),
        encrypted_parts_md5: metadata.encrypted_md5_checksums,
        encrypted_parts_sha256: metadata.encrypted_sha256_checksums,
        unencrypted_checksum: metadata.unencrypted_checksum,
        storage_alias: String::new(),
    };
    state.ingest.populate_by_event(&upload_metadata, &secret_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The federated metadata payload references a `secret_id` already
/// deposited by a prior `/federated/ingest_secret` call; unlike the
/// legacy flow, this handler never sees the raw file secret.
async fn ingest_metadata(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<EncryptedPayload>,
) -> Result<StatusCode, ApiError> {
    authorize_data_hub(&state, &headers).await?;
    let metadata = state.ingest.decrypt_payload(&payload)?;
    if state.ingest.has_already_been_processed(metadata.file_id).await? {
        return Ok(StatusCode::NO_CONTENT);
    }
    let secret_id = metadata.secret_id.clone();
    state.ingest.populate_by_event(&metadata, &secret_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct IngestSecretResponse {
    secret_id: String,
}

/// Decrypts the secret-only envelope and deposits it with the key store,
/// returning the `secret_id` that a subsequent `/federated/ingest_metadata`
/// call must reference.
async fn ingest_secret(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<EncryptedPayload>,
) -> Result<Json<IngestSecretResponse>, ApiError> {
    authorize_data_hub(&state, &headers).await?;
    let file_secret = state.ingest.decrypt_secret(&payload)?;
    let secret_id = state.ingest.store_secret(&file_secret).await?;
    Ok(Json(IngestSecretResponse { secret_id }))
}

async fn interrogation_report(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(report): Json<InterrogationReport>,
) -> Result<StatusCode, ApiError> {
    authorize_data_hub(&state, &headers).await?;
    state.interrogation.handle_interrogation_report(&report).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_uninterrogated(
    State(state): State<Arc<AppState>>,
    Path(data_hub): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authorize_data_hub(&state, &headers).await?;
    if claims.data_hub != data_hub {
        return Err(ApiError::WrongDataHubAuthorization);
    }
    let files = state.interrogation.get_files_not_yet_interrogated(&data_hub).await?;
    Ok(Json(files))
}

#[derive(Serialize)]
struct ErrorBody {
    exception_id: &'static str,
    description: String,
    data: serde_json::Value,
}

enum ApiError {
    Ingest(IngestError),
    Interrogation(InterrogationError),
    Unauthorized,
    WrongDataHubAuthorization,
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        Self::Ingest(err)
    }
}

impl From<InterrogationError> for ApiError {
    fn from(err: InterrogationError) -> Self {
        Self::Interrogation(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, exception_id, data, description) = match &self {
            ApiError::Ingest(IngestError::Decryption(_)) => {
                (StatusCode::BAD_REQUEST, "decryptionError", json!({}), self.to_string())
            }
            ApiError::Ingest(IngestError::WrongDecryptedFormat(_)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "wrongDecryptedFormat",
                json!({}),
                self.to_string(),
            ),
            ApiError::Ingest(IngestError::VaultCommunication(_)) | ApiError::Ingest(IngestError::KeyStore(_)) => (
                StatusCode::BAD_GATEWAY,
                "vaultCommunicationError",
                json!({}),
                self.to_string(),
            ),
            ApiError::Interrogation(InterrogationError::FileNotFound { file_id }) => (
                StatusCode::NOT_FOUND,
                "fileNotFound",
                json!({ "file_id": file_id }),
                self.to_string(),
            ),
            ApiError::Interrogation(InterrogationError::SecretDeposition { file_id, .. }) => (
                StatusCode::BAD_GATEWAY,
                "secretDepositionError",
                json!({ "file_id": file_id }),
                self.to_string(),
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                json!({}),
                "not authenticated".to_string(),
            ),
            ApiError::WrongDataHubAuthorization => (
                StatusCode::FORBIDDEN,
                "wrongDataHubAuthorizationError",
                json!({}),
                "token is not authorized for this data hub".to_string(),
            ),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internalError", json!({}), self.to_string()),
        };
        let body = ErrorBody {
            exception_id,
            description,
            data,
        };
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Ingest(e) => write!(f, "{e}"),
            ApiError::Interrogation(e) => write!(f, "{e}"),
            ApiError::Unauthorized => write!(f, "not authenticated"),
            ApiError::WrongDataHubAuthorization => write!(f, "token is not authorized for this data hub"),
        }
    }
}
