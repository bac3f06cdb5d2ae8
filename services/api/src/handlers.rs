//! Axum Handlers for the REST API
//!
//! Each handler validates its input, calls one upstream through `AppState`
//! and maps the result onto the shared contract types. It uses `utoipa` doc
//! comments to generate OpenAPI documentation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use parley_core::contract::{
    ErrorBody, GenerateImageRequest, GenerateImageResponse, RetrieveFileRequest,
    RetrieveFileResponse, SearchWebRequest, SearchWebResponse, SessionQuery,
    SessionTokenResponse,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{files::FileError, state::AppState};

pub enum ApiError {
    BadRequest(String),
    /// An upstream provider failed; its message is passed through.
    Upstream(anyhow::Error),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(error) => {
                (StatusCode::BAD_REQUEST, Json(ErrorBody { error })).into_response()
            }
            ApiError::Upstream(err) => {
                error!("Upstream error: {:?}", err);
                let error = err.to_string();
                (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let error = "An internal server error occurred.".to_string();
                (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error })).into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Mint an ephemeral token for a realtime session.
#[utoipa::path(
    get,
    path = "/session",
    params(SessionQuery),
    responses(
        (status = 200, description = "Session minted; the token is in client_secret.value", body = SessionTokenResponse),
        (status = 500, description = "Upstream failure", body = ErrorBody)
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let voice = non_empty(query.voice).unwrap_or_else(|| state.config.default_voice.clone());
    let instructions =
        non_empty(query.instructions).unwrap_or_else(|| state.instructions.to_string());

    let session = state
        .sessions
        .mint(&voice, &instructions)
        .await
        .map_err(ApiError::Upstream)?;
    info!(%voice, "Session token issued");
    Ok(Json(session))
}

/// Generate an image from a prompt.
#[utoipa::path(
    post,
    path = "/generate-image",
    request_body = GenerateImageRequest,
    responses(
        (status = 200, description = "Image generated", body = GenerateImageResponse),
        (status = 400, description = "Missing prompt", body = ErrorBody),
        (status = 500, description = "Upstream failure", body = ErrorBody)
    )
)]
pub async fn generate_image(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GenerateImageRequest>,
) -> Result<Json<GenerateImageResponse>, ApiError> {
    let prompt = payload.prompt.trim();
    if prompt.is_empty() {
        return Err(ApiError::BadRequest("prompt is required".to_string()));
    }
    let url = state
        .images
        .generate(prompt)
        .await
        .map_err(ApiError::Upstream)?;
    Ok(Json(GenerateImageResponse { url }))
}

/// Search the web and summarise the results.
#[utoipa::path(
    post,
    path = "/search-web",
    request_body = SearchWebRequest,
    responses(
        (status = 200, description = "Summary with numbered citations", body = SearchWebResponse),
        (status = 400, description = "Missing query", body = ErrorBody),
        (status = 500, description = "Upstream failure or search not configured", body = ErrorBody)
    )
)]
pub async fn search_web(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SearchWebRequest>,
) -> Result<Json<SearchWebResponse>, ApiError> {
    let query = payload.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("query is required".to_string()));
    }
    let result = state
        .search
        .search(query, payload.recency)
        .await
        .map_err(ApiError::Upstream)?;
    Ok(Json(result))
}

fn file_response(filename: &str, result: Result<String, FileError>) -> Response {
    match result {
        Ok(content) => (StatusCode::OK, Json(RetrieveFileResponse::found(content))).into_response(),
        Err(err) => {
            let status = match &err {
                FileError::NotAllowed => StatusCode::FORBIDDEN,
                FileError::NotFound => StatusCode::NOT_FOUND,
                FileError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            warn!(%filename, error = %err, "File retrieval failed");
            (status, Json(RetrieveFileResponse::failed(err.to_string()))).into_response()
        }
    }
}

/// Retrieve an allow-listed document on behalf of a tool call.
#[utoipa::path(
    post,
    path = "/retrieve-file",
    request_body = RetrieveFileRequest,
    responses(
        (status = 200, description = "Document content", body = RetrieveFileResponse),
        (status = 403, description = "Not on the allow-list", body = RetrieveFileResponse),
        (status = 404, description = "Document missing", body = RetrieveFileResponse)
    )
)]
pub async fn retrieve_file(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RetrieveFileRequest>,
) -> Response {
    let result = state.files.read(&payload.filename).await;
    file_response(&payload.filename, result)
}

/// Fetch an allow-listed document directly.
#[utoipa::path(
    get,
    path = "/api/files/{filename}",
    params(
        ("filename" = String, Path, description = "Document name, e.g. bio.md")
    ),
    responses(
        (status = 200, description = "Document content", body = RetrieveFileResponse),
        (status = 403, description = "Not on the allow-list", body = RetrieveFileResponse),
        (status = 404, description = "Document missing", body = RetrieveFileResponse)
    )
)]
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Response {
    let result = state.files.read(&filename).await;
    file_response(&filename, result)
}
