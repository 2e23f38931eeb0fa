//! HTTP request handlers.
//!
//! Every request goes through [`image_handler`], which dispatches on the
//! shape of the path:
//!
//! - `GET /{dir}/` - listing of subdirectories and cached images
//! - `GET /{name}` - image metadata and viewer configuration
//! - `GET /{name}.png?tile-x=&tile-y=&zoom=` - one tile
//! - `GET /{name}.png?w=&h=&x=&y=&zoom=` - a viewport centered on (x, y)
//!
//! Listing and metadata are HTML unless the `Accept` header asks for JSON.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName, Method, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::engine::{ImageEngine, ImageInfo};
use crate::error::{EngineError, ImageError, PathError, ValidationError};
use crate::image::{list_dir, EntryKind};
use crate::tile::{TileRequest, TileService};

use super::pages;

/// Header telling whether a tile came from the tile cache.
pub const TILE_CACHE_HIT_HEADER: HeaderName = HeaderName::from_static("x-tile-cache-hit");

/// Size of the preview viewport linked from listings.
pub const PREVIEW_WIDTH: u32 = 640;
pub const PREVIEW_HEIGHT: u32 = 320;

/// Tile URL template handed to viewers; x/y are tile indices at the zoom.
pub const TILE_URL_TEMPLATE: &str = "{url}?t={mtime}&tile-x={x}&tile-y={y}&zoom={z}";

/// Viewport URL template; x/y are the scaled center of the w*h viewport.
pub const VIEW_URL_TEMPLATE: &str = "{url}?w={w}&h={h}&x={x}&y={y}&zoom={z}";

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
pub struct AppState<E: ImageEngine> {
    pub tile_service: Arc<TileService<E>>,

    /// Cache-Control max-age for tiles, in seconds
    pub cache_max_age: u32,
}

impl<E: ImageEngine> AppState<E> {
    pub fn new(tile_service: TileService<E>) -> Self {
        Self::with_cache_max_age(tile_service, 3600)
    }

    pub fn with_cache_max_age(tile_service: TileService<E>, cache_max_age: u32) -> Self {
        Self {
            tile_service: Arc::new(tile_service),
            cache_max_age,
        }
    }
}

impl<E: ImageEngine> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self {
            tile_service: Arc::clone(&self.tile_service),
            cache_max_age: self.cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Query parameters for tile requests.
///
/// Values are kept as strings so malformed numbers are reported as
/// validation errors rather than extractor rejections.
#[derive(Debug, Default, Deserialize)]
pub struct TileQueryParams {
    /// Cache-busting timestamp, ignored
    #[serde(default)]
    pub t: Option<String>,

    #[serde(default, rename = "tile-x")]
    pub tile_x: Option<String>,

    #[serde(default, rename = "tile-y")]
    pub tile_y: Option<String>,

    #[serde(default)]
    pub w: Option<String>,

    #[serde(default)]
    pub h: Option<String>,

    #[serde(default)]
    pub x: Option<String>,

    #[serde(default)]
    pub y: Option<String>,

    #[serde(default)]
    pub zoom: Option<String>,
}

impl TileQueryParams {
    /// Parse into a request with exactly one addressing mode.
    ///
    /// Giving either `tile-x` or `tile-y` selects tile mode (the other
    /// defaults to 0); giving either `w` or `h` selects viewport mode, which
    /// then needs both.
    pub fn to_request(&self) -> Result<TileRequest, ValidationError> {
        let zoom = parse_param::<i32>("zoom", &self.zoom)?.unwrap_or(0);

        let tile_x = parse_param::<u64>("tile-x", &self.tile_x)?;
        let tile_y = parse_param::<u64>("tile-y", &self.tile_y)?;
        let tile = match (tile_x, tile_y) {
            (None, None) => None,
            (col, row) => Some((row.unwrap_or(0), col.unwrap_or(0))),
        };

        let w = parse_param::<u32>("w", &self.w)?;
        let h = parse_param::<u32>("h", &self.h)?;
        let viewport = match (w, h) {
            (None, None) => None,
            (Some(width), Some(height)) => {
                let x = parse_param::<u64>("x", &self.x)?.unwrap_or(0);
                let y = parse_param::<u64>("y", &self.y)?.unwrap_or(0);
                Some((x, y, width, height))
            }
            (None, Some(_)) => return Err(ValidationError::MissingParameter("w")),
            (Some(_), None) => return Err(ValidationError::MissingParameter("h")),
        };

        TileRequest::from_modes(zoom, tile, viewport)
    }
}

fn parse_param<T: FromStr>(
    name: &'static str,
    value: &Option<String>,
) -> Result<Option<T>, ValidationError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text
            .parse()
            .map(Some)
            .map_err(|_| ValidationError::InvalidParameter {
                name,
                value: text.to_string(),
            }),
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_request")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// A linked directory or image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexItem {
    /// Root-relative name (directories end in `/`)
    pub name: String,
    pub title: String,
    pub url: String,
}

impl IndexItem {
    fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let trimmed = name.trim_end_matches('/');
        let title = match trimmed.rsplit('/').next() {
            Some(base) if !base.is_empty() => base.to_string(),
            _ => "/".to_string(),
        };
        Self {
            url: url_for(&name),
            title,
            name,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IndexImage {
    #[serde(flatten)]
    pub item: IndexItem,

    /// Centered preview viewport, when the image could be opened
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<ImageInfo>,
}

/// Directory listing.
#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub name: String,
    pub title: String,
    pub breadcrumb: Vec<IndexItem>,
    pub directories: Vec<IndexItem>,
    pub images: Vec<IndexImage>,
}

/// Viewer configuration for one image.
#[derive(Debug, Serialize)]
pub struct ImageConfig {
    pub tiles_url: String,
    /// Artifact modification time (seconds), for cache busting
    pub tiles_mtime: i64,
    pub tile_url: String,
    pub view_url: String,
    pub tile_size: u32,
    pub zoom_min: i32,
    pub zoom_max: i32,
    pub image_width: u32,
    pub image_height: u32,
}

/// Image metadata.
#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub name: String,
    pub title: String,
    pub config: ImageConfig,
    pub info: ImageInfo,
}

/// URL path of a root-relative name.
pub fn url_for(name: &str) -> String {
    let encoded: Vec<_> = name
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    let path = encoded.join("/");
    if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}

/// Breadcrumb items from the root down to `name`.
pub fn breadcrumb(name: &str) -> Vec<IndexItem> {
    let mut items = vec![IndexItem::new("")];
    let mut prefix = String::new();
    for part in name.split('/').filter(|p| !p.is_empty()) {
        prefix.push_str(part);
        prefix.push('/');
        items.push(IndexItem::new(prefix.clone()));
    }
    items
}

fn preview_url(name: &str, info: &ImageInfo) -> String {
    format!(
        "{}.png?w={}&h={}&x={}&y={}&zoom=0",
        url_for(name),
        PREVIEW_WIDTH,
        PREVIEW_HEIGHT,
        info.width / 2,
        info.height / 2
    )
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert ImageError to HTTP response.
///
/// 4xx errors are logged at WARN (404 at DEBUG), 5xx errors at ERROR.
impl IntoResponse for ImageError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ImageError::NotFound(_) | ImageError::Engine(EngineError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            ImageError::Path(PathError::Escape(_)) => (StatusCode::FORBIDDEN, "forbidden"),
            ImageError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ImageError::Engine(_) => (StatusCode::INTERNAL_SERVER_ERROR, "engine_error"),
        };
        let message = match &self {
            // Do not leak filesystem paths of missing files
            ImageError::Engine(EngineError::NotFound(_)) => "Not found".to_string(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            error!(error_type, status = status.as_u16(), "Server error: {}", self);
        } else if status == StatusCode::NOT_FOUND {
            debug!(error_type, status = status.as_u16(), "Resource not found: {}", self);
        } else {
            warn!(error_type, status = status.as_u16(), "Client error: {}", message);
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

fn not_implemented(method: &Method) -> Response {
    let status = StatusCode::NOT_IMPLEMENTED;
    let body = ErrorResponse::with_status(
        "not_implemented",
        format!("Method not implemented: {}", method),
        status,
    );
    (status, Json(body)).into_response()
}

// =============================================================================
// Content negotiation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    Html,
    Json,
}

/// Pick HTML or JSON from the first `Accept` item naming exactly one of them.
pub fn negotiate(headers: &HeaderMap) -> Representation {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    for item in accept.split(',').map(str::trim) {
        match item {
            "text/html" => return Representation::Html,
            "application/json" => return Representation::Json,
            _ => continue,
        }
    }
    Representation::Html
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle every request under the image root.
pub async fn image_handler<E: ImageEngine>(
    State(state): State<AppState<E>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ImageError> {
    if method != Method::GET {
        return Ok(not_implemented(&method));
    }

    let Query(query) = Query::<TileQueryParams>::try_from_uri(&uri).map_err(|_| {
        ValidationError::InvalidParameter {
            name: "query",
            value: uri.query().unwrap_or_default().to_string(),
        }
    })?;

    let raw_path = urlencoding::decode(uri.path()).map_err(|_| {
        ValidationError::InvalidParameter {
            name: "path",
            value: uri.path().to_string(),
        }
    })?;

    let registry = state.tile_service.registry();
    let resolver = registry.resolver();
    let resolved = resolver.resolve(&raw_path, registry.extension())?;
    debug!(path = %raw_path, name = %resolved.name, ext = %resolved.ext, "resolved request");

    match resolved.ext.as_str() {
        "png" => tile_response(&state, &resolved.name, &query).await,
        "" if raw_path.ends_with('/') || resolved.is_root() => {
            index_response(&state, &resolved.name, &headers).await
        }
        "" => {
            let dir = resolver.path(&resolved.name, "")?;
            let is_dir = tokio::fs::metadata(&dir)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if is_dir {
                index_response(&state, &resolved.name, &headers).await
            } else {
                image_response(&state, &resolved.name, &headers).await
            }
        }
        _ => Err(ImageError::NotFound(raw_path.into_owned())),
    }
}

/// Render a tile.
///
/// Response headers:
/// - `Content-Type: image/png`
/// - `Cache-Control: public, max-age={cache_max_age}`
/// - `X-Tile-Cache-Hit: true|false`
async fn tile_response<E: ImageEngine>(
    state: &AppState<E>,
    name: &str,
    query: &TileQueryParams,
) -> Result<Response, ImageError> {
    let request = query.to_request()?;
    let response = state.tile_service.get_tile(name, &request).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (
                header::CACHE_CONTROL,
                format!("public, max-age={}", state.cache_max_age),
            ),
            (TILE_CACHE_HIT_HEADER, response.cache_hit.to_string()),
        ],
        response.data,
    )
        .into_response())
}

async fn index_response<E: ImageEngine>(
    state: &AppState<E>,
    name: &str,
    headers: &HeaderMap,
) -> Result<Response, ImageError> {
    let registry = state.tile_service.registry();
    let dir = registry.resolver().path(name, "")?;
    let entries = list_dir(&**registry.engine(), &dir).await?;

    let prefix = if name.is_empty() {
        String::new()
    } else {
        format!("{}/", name)
    };

    let mut directories = Vec::new();
    let mut images = Vec::new();
    for entry in entries {
        let child = format!("{}{}", prefix, entry.name);
        match entry.kind {
            EntryKind::Directory => directories.push(IndexItem::new(child)),
            EntryKind::Image => {
                let info = match registry.info(&child).await {
                    Ok(info) => Some(info),
                    Err(e) => {
                        debug!(name = %child, error = %e, "no info for listed image");
                        None
                    }
                };
                images.push(IndexImage {
                    preview_url: info.as_ref().map(|info| preview_url(&child, info)),
                    item: IndexItem::new(child),
                    info,
                });
            }
        }
    }

    let index = IndexResponse {
        title: IndexItem::new(name).title,
        name: name.to_string(),
        breadcrumb: breadcrumb(name),
        directories,
        images,
    };

    Ok(match negotiate(headers) {
        Representation::Json => Json(index).into_response(),
        Representation::Html => Html(pages::index_html(&index)).into_response(),
    })
}

async fn image_response<E: ImageEngine>(
    state: &AppState<E>,
    name: &str,
    headers: &HeaderMap,
) -> Result<Response, ImageError> {
    let info = state.tile_service.registry().info(name).await?;
    let limits = state.tile_service.limits();

    let image = ImageResponse {
        name: name.to_string(),
        title: IndexItem::new(name).title,
        config: ImageConfig {
            tiles_url: format!("{}.png", url_for(name)),
            tiles_mtime: info.cache.modified_time.timestamp(),
            tile_url: TILE_URL_TEMPLATE.to_string(),
            view_url: VIEW_URL_TEMPLATE.to_string(),
            tile_size: limits.tile_size,
            zoom_min: limits.zoom_min,
            zoom_max: limits.zoom_max,
            image_width: info.width,
            image_height: info.height,
        },
        info,
    };

    Ok(match negotiate(headers) {
        Representation::Json => Json(image).into_response(),
        Representation::Html => Html(pages::image_html(&image)).into_response(),
    })
}

// =============================================================================
// Tests
// =============================================================================
