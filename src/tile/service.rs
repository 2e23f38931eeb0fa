//! Tile service for answering tile requests.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TileService                          │
//! │  get_tile(name, request)                                    │
//! │  1. Validate + map request to a pixel region                │
//! │  2. Check the tile cache                                    │
//! │  3. Render through the registry (opens the image if needed) │
//! │  4. Cache and return                                        │
//! │        │                         │                          │
//! │        ▼                         ▼                          │
//! │  ┌───────────┐           ┌───────────────┐                  │
//! │  │ TileCache │           │ ImageRegistry │                  │
//! │  └───────────┘           └───────────────┘                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::engine::ImageEngine;
use crate::error::ImageError;
use crate::image::ImageRegistry;

use super::addressing::{PixelRegion, TileLimits, TileRequest};
use super::cache::{TileCache, TileCacheKey};

/// A rendered tile.
#[derive(Debug, Clone)]
pub struct TileResponse {
    /// Encoded PNG data
    pub data: Bytes,

    /// Whether the tile came from the tile cache
    pub cache_hit: bool,

    /// The region that was rendered
    pub region: PixelRegion,
}

/// Validates, renders and caches tiles.
pub struct TileService<E: ImageEngine> {
    registry: Arc<ImageRegistry<E>>,
    cache: TileCache,
    limits: TileLimits,
}

impl<E: ImageEngine> TileService<E> {
    /// Create a tile service with default limits and cache capacity.
    pub fn new(registry: Arc<ImageRegistry<E>>) -> Self {
        Self::with_options(registry, TileLimits::default(), TileCache::new())
    }

    pub fn with_options(
        registry: Arc<ImageRegistry<E>>,
        limits: TileLimits,
        cache: TileCache,
    ) -> Self {
        Self {
            registry,
            cache,
            limits,
        }
    }

    /// Get a tile, using the cache when available.
    ///
    /// # Errors
    ///
    /// - [`ImageError::Validation`] for zoom or area outside the limits
    /// - [`ImageError::NotFound`] when the image has no cache artifact
    /// - [`ImageError::Engine`] when rendering fails
    pub async fn get_tile(
        &self,
        name: &str,
        request: &TileRequest,
    ) -> Result<TileResponse, ImageError> {
        let region = request.to_region(&self.limits)?;
        let key = TileCacheKey::new(name, region, request.zoom);

        if let Some(data) = self.cache.get(&key).await {
            return Ok(TileResponse {
                data,
                cache_hit: true,
                region,
            });
        }

        let data = self.registry.render(name, region, request.zoom).await?;
        debug!(name, ?region, zoom = request.zoom, bytes = data.len(), "rendered tile");
        self.cache.put(key, data.clone()).await;

        Ok(TileResponse {
            data,
            cache_hit: false,
            region,
        })
    }

    pub fn registry(&self) -> &Arc<ImageRegistry<E>> {
        &self.registry
    }

    pub fn limits(&self) -> &TileLimits {
        &self.limits
    }
}
