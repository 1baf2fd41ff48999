//! DRS HTTP surface, grounded in
//! `original_source/src/dcs/adapters/inbound/fastapi_/routes.py` and
//! `http_authorization.py`. Both object endpoints require a work-order
//! token whose `file_id` claim is checked against the URL path id before
//! any DAO access (spec.md §4.5, §8 property 7).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use flp_common::auth::{verify_work_order_token, JwksCache};
use serde::Serialize;
use serde_json::json;

use crate::core::DataRepository;
use crate::error::RepositoryError;

#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<DataRepository>,
    pub issuer_keys: JwksCache,
    pub url_max_age: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ga4gh/drs/v1/objects/:object_id", get(get_drs_object))
        .route("/ga4gh/drs/v1/objects/:object_id/envelopes", get(get_envelope))
        .route("/health", get(|| async { StatusCode::OK }))
        .with_state(state)
}

async fn authorize(state: &AppState, headers: &HeaderMap, object_id: &str) -> Result<(), ApiError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let claims = verify_work_order_token(token, &state.issuer_keys)
        .await
        .map_err(|_| ApiError::Unauthorized)?;

    if claims.type_ != "download" || claims.file_id != object_id {
        return Err(ApiError::WrongFileAuthorization);
    }
    Ok(())
}

async fn get_drs_object(
    State(state): State<AppState>,
    Path(object_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    authorize(&state, &headers, &object_id).await?;

    match state.repository.access_drs_object(&object_id).await {
        Ok((drs_object, access_url)) => {
            let self_uri = state.repository.drs_uri(&object_id);
            let response = drs_object.into_response(self_uri, access_url);
            let cache_control = format!("max-age={}, private", state.url_max_age);
            let mut res = (StatusCode::OK, Json(response)).into_response();
            res.headers_mut().insert(
                axum::http::header::CACHE_CONTROL,
                HeaderValue::from_str(&cache_control).expect("valid header value"),
            );
            Ok(res)
        }
        Err(RepositoryError::RetryAccessLater { retry_after }) => {
            let mut res = (StatusCode::ACCEPTED, Json(json!({ "retry_after": retry_after }))).into_response();
            res.headers_mut()
                .insert(axum::http::header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            res.headers_mut().insert(
                axum::http::header::RETRY_AFTER,
                HeaderValue::from_str(&retry_after.to_string()).expect("digits are valid header value"),
            );
            Ok(res)
        }
        Err(other) => Err(other.into()),
    }
}

async fn get_envelope(
    State(state): State<AppState>,
    Path(object_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let claims = verify_work_order_token(token, &state.issuer_keys)
        .await
        .map_err(|_| ApiError::Unauthorized)?;
    if claims.type_ != "download" || claims.file_id != object_id {
        return Err(ApiError::WrongFileAuthorization);
    }

    let content = state
        .repository
        .serve_envelope(&object_id, &claims.user_public_crypt4gh_key)
        .await?;
    Ok(Json(json!({ "content": content })))
}

#[derive(Serialize)]
struct ErrorBody {
    exception_id: &'static str,
    description: String,
    data: serde_json::Value,
}

enum ApiError {
    Unauthorized,
    WrongFileAuthorization,
    Repository(RepositoryError),
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        Self::Repository(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, exception_id, description, data) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or invalid work order token".to_string(),
                json!({}),
            ),
            ApiError::WrongFileAuthorization => (
                StatusCode::FORBIDDEN,
                "wrongFileAuthorizationError",
                "mismatch of URL file id and token file id".to_string(),
                json!({}),
            ),
            ApiError::Repository(err) => match err {
                RepositoryError::DrsObjectNotFound { drs_id } => (
                    StatusCode::NOT_FOUND,
                    "noSuchObject",
                    err.to_string(),
                    json!({ "object_id": drs_id }),
                ),
                RepositoryError::ApiCommunicationError { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "externalAPIError", err.to_string(), json!({}))
                }
                RepositoryError::EnvelopeNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "envelopeNotFoundError", err.to_string(), json!({}))
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "internalError", err.to_string(), json!({})),
            },
        };
        let body = ErrorBody {
            exception_id,
            description,
            data,
        };
        (status, Json(body)).into_response()
    }
}
