//! Test utilities for integration tests.
//!
//! Helpers for generating source PNGs, building cache artifacts and driving
//! the router.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use image::{Rgba, RgbaImage};
use tower::ServiceExt;

use zoomtile::cache::{refresh, RefreshOptions, RefreshOutcome};
use zoomtile::engine::PngEngine;
use zoomtile::image::{ImageRegistry, NameResolver};
use zoomtile::source::scan_file;
use zoomtile::tile::{TileCache, TileLimits, TileService};
use zoomtile::{create_router, RouterConfig};

// =============================================================================
// Images
// =============================================================================

/// Write an RGBA PNG whose pixels come from `pixel(x, y)`.
pub fn write_png(path: &Path, width: u32, height: u32, pixel: impl Fn(u32, u32) -> [u8; 4]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let image = RgbaImage::from_fn(width, height, |x, y| Rgba(pixel(x, y)));
    image.save(path).unwrap();
}

/// Write a PNG filled with one color.
pub fn write_solid_png(path: &Path, width: u32, height: u32, color: [u8; 4]) {
    write_png(path, width, height, |_, _| color);
}

/// Pixel pattern that encodes its own coordinates.
pub fn coordinate_pixel(x: u32, y: u32) -> [u8; 4] {
    [(x % 256) as u8, (y % 256) as u8, 0x80, 0xff]
}

pub fn decode_png(bytes: &[u8]) -> RgbaImage {
    image::load_from_memory(bytes).unwrap().to_rgba8()
}

// =============================================================================
// Cache artifacts
// =============================================================================

/// Build (or refresh) the artifact of a single source file.
pub async fn build_cache(path: &Path) -> RefreshOutcome {
    build_cache_with(path, &RefreshOptions::default()).await
}

pub async fn build_cache_with(path: &Path, options: &RefreshOptions) -> RefreshOutcome {
    let engine = PngEngine::new();
    let source = scan_file(&engine, path)
        .await
        .unwrap()
        .expect("not a recognized image");
    refresh(&engine, &source, options).await.unwrap()
}

// =============================================================================
// Server
// =============================================================================

pub struct TestServer {
    pub router: Router,
    pub registry: Arc<ImageRegistry<PngEngine>>,
}

impl TestServer {
    pub fn new(root: &Path) -> Self {
        Self::with_limits(root, TileLimits::default())
    }

    pub fn with_limits(root: &Path, limits: TileLimits) -> Self {
        let registry = Arc::new(ImageRegistry::new(
            Arc::new(PngEngine::new()),
            NameResolver::new(root),
        ));
        let service = TileService::with_options(Arc::clone(&registry), limits, TileCache::new());
        let router = create_router(service, RouterConfig::new().with_tracing(false));
        Self { router, registry }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn get_json(&self, uri: &str) -> TestResponse {
        self.request(
            Request::builder()
                .uri(uri)
                .header(header::ACCEPT, "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn request(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        TestResponse {
            status,
            headers,
            body: body.to_vec(),
        }
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
