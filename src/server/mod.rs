//! HTTP server layer for zoomtile.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │          GET /{dir}/   GET /{name}   GET /{name}.png            │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  handlers   │  │    pages    │  │        routes           │  │
//! │  │ (requests)  │  │   (HTML)    │  │  (router config)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
mod pages;
pub mod routes;

pub use handlers::{
    breadcrumb, image_handler, negotiate, url_for, AppState, ErrorResponse, ImageConfig,
    ImageResponse, IndexImage, IndexItem, IndexResponse, Representation, TileQueryParams,
    TILE_CACHE_HIT_HEADER,
};
pub use routes::{create_router, RouterConfig};
