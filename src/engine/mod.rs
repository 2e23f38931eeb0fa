//! Pixel cache engine abstraction.
//!
//! The engine owns the cache artifact format: it classifies files, derives
//! artifact paths, reports freshness, rebuilds artifacts from source parts,
//! and renders pixel regions out of an attached artifact. Everything above
//! this module (scanning, cache lifecycle, the registry, the server) talks to
//! it only through [`ImageEngine`].
//!
//! [`PngEngine`] is the bundled implementation.

mod artifact;
mod png;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::EngineError;
use crate::source::PartGrid;
use crate::tile::PixelRegion;

pub use artifact::CACHE_VERSION;
pub use png::{CacheHandle, PngEngine};

// =============================================================================
// Formats and status
// =============================================================================

/// File format as classified by [`ImageEngine::sniff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// A raw PNG source image
    Png,
    /// An engine cache artifact
    Cache,
}

impl ImageFormat {
    pub const fn name(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Cache => "cache",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Freshness of a cache artifact relative to its sources.
///
/// A status that cannot be determined is reported as an `Err` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// No artifact exists yet
    None,
    /// The artifact matches the current sources
    Fresh,
    /// The sources changed since the artifact was written
    Stale,
    /// The artifact uses another schema version
    Incompat,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheStatus::None => "none",
            CacheStatus::Fresh => "fresh",
            CacheStatus::Stale => "stale",
            CacheStatus::Incompat => "incompat",
        })
    }
}

// =============================================================================
// Image info
// =============================================================================

/// Snapshot of an attached cache artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    /// Declared pixel format of the source
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    pub cache: CacheInfo,
    /// Absent when the source file is gone (only the artifact remains).
    /// For mosaics this describes the first part only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheInfo {
    pub version: u32,
    pub modified_time: DateTime<Utc>,
    pub bytes: u64,
    pub blocks: u64,
}

/// Size and mtime of the primary source file, found through the absolute
/// path recorded in the artifact header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub modified_time: DateTime<Utc>,
    pub bytes: u64,
}

// =============================================================================
// Update parameters
// =============================================================================

/// RGBA pixel.
pub type Pixel = [u8; 4];

/// Options for [`ImageEngine::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageParams {
    /// Fill for empty mosaic cells; transparent when unset
    pub background: Option<Pixel>,
}

impl ImageParams {
    pub fn background(&self) -> Pixel {
        self.background.unwrap_or([0, 0, 0, 0])
    }
}

/// Parse a background pixel from 1 to 4 hex-encoded bytes (`"ff0000ff"`).
///
/// Channels that are not given stay 0.
pub fn parse_background(value: &str) -> Result<Pixel, String> {
    let value = value.trim().trim_start_matches('#');

    if value.is_empty() || value.len() % 2 != 0 || value.len() > 8 {
        return Err(format!(
            "expected 1-4 hex bytes, got {:?}",
            value
        ));
    }

    let mut pixel = [0u8; 4];
    for (i, chunk) in value.as_bytes().chunks(2).enumerate() {
        let digits = std::str::from_utf8(chunk).map_err(|e| e.to_string())?;
        pixel[i] = u8::from_str_radix(digits, 16)
            .map_err(|_| format!("invalid hex byte {:?}", digits))?;
    }

    Ok(pixel)
}

// =============================================================================
// Engine trait
// =============================================================================

/// Pixel cache engine.
///
/// Handles are opened against a cache path and are either attached read-only
/// (serving) or rebuilt with [`update`](Self::update) (maintenance only).
#[async_trait]
pub trait ImageEngine: Send + Sync + 'static {
    /// Per-artifact state.
    type Handle: Send + Sync + 'static;

    /// Classify a file, `None` when it is not an image this engine knows.
    async fn sniff(&self, path: &Path) -> Result<Option<ImageFormat>, EngineError>;

    /// Derive the cache artifact path for a source path.
    fn cache_path(&self, path: &Path) -> Result<PathBuf, EngineError>;

    /// Create a handle for a cache path; does not touch the artifact.
    async fn open(&self, cache_path: &Path) -> Result<Self::Handle, EngineError>;

    /// Freshness of the handle's artifact relative to `sources`.
    async fn status(
        &self,
        handle: &Self::Handle,
        sources: &PartGrid,
    ) -> Result<CacheStatus, EngineError>;

    /// Attach the existing artifact for reading.
    async fn attach(&self, handle: &mut Self::Handle) -> Result<(), EngineError>;

    /// Rebuild the artifact from `sources`, then attach it.
    async fn update(
        &self,
        handle: &mut Self::Handle,
        sources: &PartGrid,
        params: &ImageParams,
    ) -> Result<(), EngineError>;

    /// Describe the attached artifact.
    async fn info(&self, handle: &Self::Handle) -> Result<ImageInfo, EngineError>;

    /// Render a region at a zoom level as an encoded PNG.
    async fn render_tile(
        &self,
        handle: &Self::Handle,
        region: PixelRegion,
        zoom: i32,
    ) -> Result<Bytes, EngineError>;

    /// Release the handle.
    async fn close(&self, handle: Self::Handle) -> Result<(), EngineError>;
}
