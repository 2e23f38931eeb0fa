//! # zoomtile
//!
//! A tile server for very large PNG images.
//!
//! Source images (single PNGs or mosaics of PNG parts) are converted offline
//! into uncompressed pixel cache artifacts. The server then answers tile and
//! viewport requests at arbitrary zoom levels by reading only the rows it
//! needs from those artifacts and encoding the result as PNG.
//!
//! ## Features
//!
//! - **Offline caching**: `zoomtile cache` builds artifacts only when they are
//!   missing, stale or incompatible
//! - **Mosaics**: many `name_ROW_COL.png` parts composed into one image
//! - **Two addressing modes**: fixed tile grid or centered viewport
//! - **Zoom in and out**: pixel replication and block averaging
//! - **Browsable**: directory listings and image metadata as HTML or JSON
//!
//! ## Architecture
//!
//! - [`source`] - Discovery of source images and mosaic parts
//! - [`engine`] - Cache artifact format and pixel rendering
//! - [`cache`] - Offline cache maintenance
//! - [`image`] - Name resolution and the shared image registry
//! - [`tile`] - Tile addressing, rendered tile cache and tile service
//! - [`server`] - Axum-based HTTP facade
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zoomtile::{create_router, ImageRegistry, NameResolver, PngEngine, RouterConfig, TileService};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let registry = ImageRegistry::new(Arc::new(PngEngine::new()), NameResolver::new("/srv/images"));
//!     let router = create_router(TileService::new(Arc::new(registry)), RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, router).await
//! }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod image;
pub mod server;
pub mod source;
pub mod tile;

// Re-export commonly used types
pub use cache::{decide, refresh, CacheAction, RefreshOptions, RefreshOutcome};
pub use config::{CacheConfig, Cli, Command, ServeConfig};
pub use engine::{
    CacheStatus, ImageEngine, ImageFormat, ImageInfo, ImageParams, PngEngine, CACHE_VERSION,
};
pub use error::{
    AssemblyError, CacheError, EngineError, ImageError, PathError, ScanError, ValidationError,
};
pub use image::{ImageRegistry, NameResolver};
pub use server::{create_router, AppState, ErrorResponse, RouterConfig};
pub use source::{assemble_parts, scan, scan_file, CacheFilter, PartGrid, SourceImage, SourceKind};
pub use tile::{
    PixelRegion, TileCache, TileLimits, TileRequest, TileResponse, TileService,
    DEFAULT_TILE_CACHE_CAPACITY,
};
