//! Tile service layer.
//!
//! Sits between the HTTP layer and the image registry:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP Handlers              │
//! └────────────────────┬────────────────────┘
//!                      │ TileRequest
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              Tile Service               │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  addressing  │  │   TileCache     │  │
//! │  │ (request →   │  │  (encoded PNGs) │  │
//! │  │  region)     │  │                 │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │ PixelRegion + zoom
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │             ImageRegistry               │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use zoomtile::tile::{TileLimits, TileRequest};
//!
//! let region = TileRequest::tile(1, 2, 1)
//!     .to_region(&TileLimits::default())
//!     .unwrap();
//! assert_eq!((region.x, region.y), (1024, 512));
//! assert_eq!((region.width, region.height), (256, 256));
//! ```

mod addressing;
mod cache;
mod service;

pub use addressing::{
    scale_center, zoom_scale, Addressing, PixelRegion, TileLimits, TileRequest, DEFAULT_MAX_AREA,
    DEFAULT_TILE_SIZE, DEFAULT_ZOOM_MAX, DEFAULT_ZOOM_MIN,
};
pub use cache::{TileCache, TileCacheKey, DEFAULT_TILE_CACHE_CAPACITY};
pub use service::{TileResponse, TileService};
