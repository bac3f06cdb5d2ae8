//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the proxy: the session,
//! tool and document endpoints, the OpenAPI documentation, and the static
//! front-end files served for every other path.

use crate::{handlers, state::AppState};

use axum::{
    Router,
    routing::{get, post},
};
use parley_core::contract::{
    Citation, ClientSecret, ErrorBody, GenerateImageRequest, GenerateImageResponse, Recency,
    RetrieveFileRequest, RetrieveFileResponse, SearchWebRequest, SearchWebResponse,
    SessionTokenResponse,
};
use std::sync::Arc;
use tower_http::services::ServeDir;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_session,
        handlers::generate_image,
        handlers::search_web,
        handlers::retrieve_file,
        handlers::get_file,
    ),
    components(
        schemas(
            SessionTokenResponse, ClientSecret, GenerateImageRequest, GenerateImageResponse,
            SearchWebRequest, SearchWebResponse, Citation, Recency,
            RetrieveFileRequest, RetrieveFileResponse, ErrorBody
        )
    ),
    tags(
        (name = "Parley API", description = "Session minting and tool proxy for the Parley voice assistant")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let static_files = ServeDir::new(&app_state.config.static_dir);

    let api_router = Router::new()
        .route("/session", get(handlers::get_session))
        .route("/generate-image", post(handlers::generate_image))
        .route("/search-web", post(handlers::search_web))
        .route("/retrieve-file", post(handlers::retrieve_file))
        .route("/api/files/{filename}", get(handlers::get_file))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
        .fallback_service(static_files)
}
