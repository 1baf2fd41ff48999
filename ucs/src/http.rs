//! HTTP surface for the upload controller, grounded in
//! `original_source/services/ucs/src/ucs/adapters/inbound/fastapi_/routes.py`
//! and `http_exceptions.py`. Every domain error maps to the
//! `{exception_id, description, data}` envelope spec.md §6 requires.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use flp_common::auth::{verify_resource_token, verify_token_type, JwksCache};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::core::UploadController;
use crate::error::ControllerError;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<UploadController>,
    pub issuer_keys: JwksCache,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/boxes", post(create_box))
        .route("/boxes/:box_id", patch(set_box_lock))
        .route("/boxes/:box_id/uploads", get(list_uploads).post(initiate_upload))
        .route(
            "/boxes/:box_id/uploads/:file_id/parts/:part_no",
            get(part_upload_url),
        )
        .route(
            "/boxes/:box_id/uploads/:file_id",
            patch(complete_upload).delete(remove_upload),
        )
        .route("/health", get(|| async { StatusCode::OK }))
        .with_state(state)
}

/// Extract the bearer token from `Authorization`, or fail with 401 before
/// any resource binding check runs.
fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)
}

/// Require a UOS token bound to `box_id` (view/lock/unlock a box, spec.md
/// §6).
async fn require_uos(state: &AppState, headers: &HeaderMap, box_id: Uuid) -> Result<(), ApiError> {
    let token = bearer_token(headers)?;
    verify_resource_token(token, &state.issuer_keys, "upload_box", &box_id.to_string())
        .await
        .map_err(|_| ApiError::Unauthorized)?;
    Ok(())
}

/// Require a WPS token bound to `file_id` (upload/close/delete a file,
/// spec.md §6).
async fn require_wps(state: &AppState, headers: &HeaderMap, file_id: Uuid) -> Result<(), ApiError> {
    let token = bearer_token(headers)?;
    verify_resource_token(token, &state.issuer_keys, "file_upload", &file_id.to_string())
        .await
        .map_err(|_| ApiError::Unauthorized)?;
    Ok(())
}

#[derive(Deserialize)]
struct CreateBoxRequest {
    storage_alias: String,
}

async fn create_box(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateBoxRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)?;
    verify_token_type(token, &state.issuer_keys, "upload_box")
        .await
        .map_err(|_| ApiError::Unauthorized)?;
    let id = state.controller.create_file_upload_box(&req.storage_alias).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

#[derive(Deserialize)]
struct SetBoxLockRequest {
    lock: bool,
}

async fn set_box_lock(
    State(state): State<AppState>,
    Path(box_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<SetBoxLockRequest>,
) -> Result<StatusCode, ApiError> {
    require_uos(&state, &headers, box_id).await?;
    if req.lock {
        state.controller.lock_file_upload_box(box_id).await?;
    } else {
        state.controller.unlock_file_upload_box(box_id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn list_uploads(
    State(state): State<AppState>,
    Path(box_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_uos(&state, &headers, box_id).await?;
    let ids = state.controller.get_file_ids_for_box(box_id).await?;
    Ok(Json(ids))
}

#[derive(Deserialize)]
struct InitiateUploadRequest {
    alias: String,
    checksum: String,
    size: u64,
}

async fn initiate_upload(
    State(state): State<AppState>,
    Path(box_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<InitiateUploadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_uos(&state, &headers, box_id).await?;
    let file_id = state
        .controller
        .initiate_file_upload(box_id, &req.alias, &req.checksum, req.size)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": file_id }))))
}

async fn part_upload_url(
    State(state): State<AppState>,
    Path((_box_id, file_id, part_no)): Path<(Uuid, Uuid, i32)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_wps(&state, &headers, file_id).await?;
    let url = state.controller.get_part_upload_url(file_id, part_no).await?;
    Ok(Json(json!({ "url": url })))
}

async fn complete_upload(
    State(state): State<AppState>,
    Path((box_id, file_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    require_wps(&state, &headers, file_id).await?;
    state.controller.complete_file_upload(box_id, file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_upload(
    State(state): State<AppState>,
    Path((box_id, file_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    require_wps(&state, &headers, file_id).await?;
    state.controller.remove_file_upload(box_id, file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct ErrorBody {
    exception_id: &'static str,
    description: String,
    data: serde_json::Value,
}

enum ApiError {
    Unauthorized,
    Controller(ControllerError),
}

impl From<ControllerError> for ApiError {
    fn from(err: ControllerError) -> Self {
        Self::Controller(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            ApiError::Unauthorized => {
                let body = ErrorBody {
                    exception_id: "unauthorized",
                    description: "missing or invalid work order token".to_string(),
                    data: json!({}),
                };
                return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
            }
            ApiError::Controller(err) => err,
        };
        let (status, exception_id, data) = match &err {
            ControllerError::UnknownStorageAlias { .. } => (StatusCode::BAD_REQUEST, "noSuchStorage", json!({})),
            ControllerError::BoxNotFound { box_id } => {
                (StatusCode::NOT_FOUND, "boxNotFound", json!({ "box_id": box_id }))
            }
            ControllerError::LockedBox { box_id } => {
                (StatusCode::CONFLICT, "lockedBox", json!({ "box_id": box_id }))
            }
            ControllerError::FileUploadAlreadyExists { alias } => {
                (StatusCode::CONFLICT, "fileUploadAlreadyExists", json!({ "alias": alias }))
            }
            ControllerError::FileUploadNotFound { file_id } => {
                (StatusCode::NOT_FOUND, "fileUploadNotFound", json!({ "file_id": file_id }))
            }
            ControllerError::S3UploadDetailsNotFound { file_id } => (
                StatusCode::NOT_FOUND,
                "s3UploadDetailsNotFound",
                json!({ "file_id": file_id }),
            ),
            ControllerError::S3UploadNotFound { .. } => (StatusCode::NOT_FOUND, "s3UploadNotFound", json!({})),
            ControllerError::OrphanedMultipartUpload { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internalError", json!({}))
            }
            ControllerError::UploadCompletionError { box_id, file_id, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "uploadCompletionError",
                json!({ "box_id": box_id, "file_id": file_id }),
            ),
            ControllerError::UploadAbortError { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "uploadAbortError", json!({}))
            }
            ControllerError::IncompleteUploads { box_id, file_ids } => (
                StatusCode::CONFLICT,
                "incompleteUploads",
                json!({ "box_id": box_id, "file_ids": file_ids }),
            ),
            ControllerError::ObjectStorage(_) | ControllerError::Dao(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internalError", json!({}))
            }
        };
        let body = ErrorBody {
            exception_id,
            description: err.to_string(),
            data,
        };
        (status, Json(body)).into_response()
    }
}
