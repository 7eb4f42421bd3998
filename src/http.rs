//! HTTP shell: the axum router binding the core's four public operations
//! to the routes in spec.md §6. Grounded on the teacher's `main.rs` router
//! wiring (`Extension`, `CorsLayer`, `ServeDir`) and on `mapTileRoute.go`/
//! `mapStyleRoute.go`/`webPageRoute.go`'s status-code behaviour.

use std::sync::Arc;

use axum::extract::Path;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::{Extension, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::error::OsmIntileError;
use crate::store::SpatialStore;
use crate::tile::{self, TileCoord};

#[derive(Clone)]
pub struct AppState {
    pub store: SpatialStore,
    pub public_url: String,
}

pub fn router(state: AppState, static_dir: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        .route("/style.json", get(style_json))
        .route("/tiles/:level/:z/:x/:y", get(tile_route))
        .nest_service("/", ServeDir::new(static_dir))
        .layer(middleware::from_fn(reject_disallowed_static_paths))
        .layer(Extension(Arc::new(state)))
        .layer(cors)
}

/// Static assets are served only at `/` and at paths ending in
/// `.js`/`.css`/`.html`; everything else is `403 Forbidden`, mirroring
/// `webPageRoute.go`'s `allowedFilesRegex`. API routes are left alone.
async fn reject_disallowed_static_paths<B>(request: Request<B>, next: Next<B>) -> Response {
    let path = request.uri().path();
    let is_api_route = path == "/style.json" || path.starts_with("/tiles/");
    let is_allowed_static = path == "/"
        || path.ends_with(".js")
        || path.ends_with(".css")
        || path.ends_with(".html");

    if is_api_route || is_allowed_static {
        next.run(request).await
    } else {
        (StatusCode::FORBIDDEN, "403 Forbidden").into_response()
    }
}

async fn style_json(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(crate::style::default_map_style(&state.public_url))
}

async fn tile_route(
    Path((level, z, x, y)): Path<(String, String, String, String)>,
    headers: HeaderMap,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    match build_tile(&state, &level, &z, &x, &y, &headers).await {
        Ok(response) => response,
        Err(OsmIntileError::BadRequest(message)) => (StatusCode::BAD_REQUEST, message).into_response(),
        Err(other) => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response(),
    }
}

async fn build_tile(
    state: &AppState,
    level: &str,
    z: &str,
    x: &str,
    y: &str,
    headers: &HeaderMap,
) -> Result<Response, OsmIntileError> {
    let level: i64 = level
        .parse()
        .map_err(|_| OsmIntileError::BadRequest(format!("invalid level {level:?}")))?;
    let z: u32 = z
        .parse()
        .map_err(|_| OsmIntileError::BadRequest(format!("invalid z {z:?}")))?;
    let x: u32 = x
        .parse()
        .map_err(|_| OsmIntileError::BadRequest(format!("invalid x {x:?}")))?;
    let y: u32 = y
        .parse()
        .map_err(|_| OsmIntileError::BadRequest(format!("invalid y {y:?}")))?;

    let accept_gzip = headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.contains("gzip"))
        .unwrap_or(false);

    let conn = state.store.connection();
    let bytes = tile::get_tile(&conn, level, TileCoord { z, x, y }, accept_gzip)
        .map_err(OsmIntileError::into_tile_unavailable)?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        "application/octet-stream".parse().unwrap(),
    );
    if accept_gzip {
        response_headers.insert(header::CONTENT_ENCODING, "gzip".parse().unwrap());
    }

    Ok((response_headers, bytes).into_response())
}
