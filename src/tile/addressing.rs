//! Mapping of tile and viewport requests to absolute pixel regions.
//!
//! Zoom levels are signed powers of two: positive levels zoom out (each
//! output pixel covers `2^zoom` source pixels), negative levels zoom in.
//! Coordinates in a request are expressed at the requested zoom and scaled
//! back to full-resolution pixels here.

use std::cmp::Ordering;

use serde::Serialize;

use crate::error::ValidationError;

/// Default tile edge in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

pub const DEFAULT_ZOOM_MIN: i32 = 0;
pub const DEFAULT_ZOOM_MAX: i32 = 4;

/// Default maximum output area (one 1920x1200 screen).
pub const DEFAULT_MAX_AREA: u64 = 1920 * 1200;

/// Bounds applied to every tile request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileLimits {
    pub tile_size: u32,
    pub zoom_min: i32,
    pub zoom_max: i32,
    pub max_area: u64,
}

impl Default for TileLimits {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            zoom_min: DEFAULT_ZOOM_MIN,
            zoom_max: DEFAULT_ZOOM_MAX,
            max_area: DEFAULT_MAX_AREA,
        }
    }
}

/// Absolute rectangle in full-resolution source pixels.
///
/// `width` and `height` are the size of the rendered output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PixelRegion {
    pub x: u64,
    pub y: u64,
    pub width: u32,
    pub height: u32,
}

/// How a request locates its region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Fixed-size tile in a grid at the requested zoom
    TileIndex { row: u64, col: u64 },
    /// Viewport of the given size centered on (x, y) at the requested zoom
    ViewportCenter {
        x: u64,
        y: u64,
        width: u32,
        height: u32,
    },
}

/// A tile request with exactly one addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRequest {
    pub zoom: i32,
    pub addressing: Addressing,
}

impl TileRequest {
    pub fn tile(row: u64, col: u64, zoom: i32) -> Self {
        Self {
            zoom,
            addressing: Addressing::TileIndex { row, col },
        }
    }

    pub fn viewport(x: u64, y: u64, width: u32, height: u32, zoom: i32) -> Self {
        Self {
            zoom,
            addressing: Addressing::ViewportCenter {
                x,
                y,
                width,
                height,
            },
        }
    }

    /// Build a request from optionally-present addressing modes.
    ///
    /// Exactly one of `tile` (row, col) and `viewport` (x, y, width, height)
    /// must be given.
    pub fn from_modes(
        zoom: i32,
        tile: Option<(u64, u64)>,
        viewport: Option<(u64, u64, u32, u32)>,
    ) -> Result<Self, ValidationError> {
        match (tile, viewport) {
            (Some((row, col)), None) => Ok(Self::tile(row, col, zoom)),
            (None, Some((x, y, width, height))) => Ok(Self::viewport(x, y, width, height, zoom)),
            (Some(_), Some(_)) => Err(ValidationError::AmbiguousMode),
            (None, None) => Err(ValidationError::MissingMode),
        }
    }

    /// Validate against `limits` and compute the absolute region.
    pub fn to_region(&self, limits: &TileLimits) -> Result<PixelRegion, ValidationError> {
        if self.zoom < limits.zoom_min || self.zoom > limits.zoom_max {
            return Err(ValidationError::ZoomOutOfRange {
                zoom: self.zoom,
                min: limits.zoom_min,
                max: limits.zoom_max,
            });
        }

        let (width, height) = match self.addressing {
            Addressing::TileIndex { .. } => (limits.tile_size, limits.tile_size),
            Addressing::ViewportCenter { width, height, .. } => (width, height),
        };
        if width == 0 || height == 0 {
            return Err(ValidationError::EmptyArea { width, height });
        }
        if width as u64 * height as u64 > limits.max_area {
            return Err(ValidationError::AreaTooLarge {
                width,
                height,
                limit: limits.max_area,
            });
        }

        let (x, y) = match self.addressing {
            Addressing::TileIndex { row, col } => {
                let size = limits.tile_size as u64;
                (
                    zoom_scale(col.saturating_mul(size), self.zoom),
                    zoom_scale(row.saturating_mul(size), self.zoom),
                )
            }
            Addressing::ViewportCenter { x, y, width, height } => (
                scale_center(x, width, self.zoom),
                scale_center(y, height, self.zoom),
            ),
        };

        Ok(PixelRegion {
            x,
            y,
            width,
            height,
        })
    }
}

/// Scale a coordinate at `zoom` to full resolution, saturating on overflow.
pub fn zoom_scale(value: u64, zoom: i32) -> u64 {
    match zoom.cmp(&0) {
        Ordering::Greater => {
            let factor = 1u64.checked_shl(zoom.unsigned_abs()).unwrap_or(u64::MAX);
            value.saturating_mul(factor)
        }
        Ordering::Less => value.checked_shr(zoom.unsigned_abs()).unwrap_or(0),
        Ordering::Equal => value,
    }
}

/// Top-left of a `size`-wide span centered on `center`, clamped at 0.
pub fn scale_center(center: u64, size: u32, zoom: i32) -> u64 {
    let half = size as u64 / 2;
    if center > half {
        zoom_scale(center - half, zoom)
    } else {
        0
    }
}
