//! Configuration management for zoomtile.
//!
//! Two subcommands share one binary:
//!
//! - `zoomtile serve` - HTTP tile server over a directory of cache artifacts
//! - `zoomtile cache` - build or refresh cache artifacts from source PNGs
//!
//! # Environment Variables
//!
//! Every `serve` option can also be set through the environment:
//!
//! - `ZOOMTILE_HOST` - Server bind address (default: 0.0.0.0)
//! - `ZOOMTILE_PORT` - Server port (default: 8080)
//! - `ZOOMTILE_ROOT` - Image root directory (default: .)
//! - `ZOOMTILE_TILE_SIZE` - Tile edge in pixels (default: 256)
//! - `ZOOMTILE_ZOOM_MIN` / `ZOOMTILE_ZOOM_MAX` - Accepted zoom range (default: 0..4)
//! - `ZOOMTILE_MAX_AREA` - Largest viewport area in pixels (default: 1920x1200)
//! - `ZOOMTILE_TILE_CACHE_BYTES` - Rendered tile cache size (default: 64MB)
//! - `ZOOMTILE_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)
//! - `ZOOMTILE_CORS_ORIGINS` - Comma-separated allowed origins (default: any)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::cache::RefreshOptions;
use crate::engine::{parse_background, ImageParams};
use crate::server::RouterConfig;
use crate::source::CacheFilter;
use crate::tile::{
    PixelRegion, TileLimits, DEFAULT_MAX_AREA, DEFAULT_TILE_CACHE_CAPACITY, DEFAULT_TILE_SIZE,
    DEFAULT_ZOOM_MAX, DEFAULT_ZOOM_MIN,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

// =============================================================================
// CLI Arguments
// =============================================================================

/// zoomtile - A tile server for very large PNG images.
#[derive(Parser, Debug, Clone)]
#[command(name = "zoomtile")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve tiles over HTTP from cache artifacts under a root directory.
    Serve(ServeConfig),

    /// Build or refresh cache artifacts from source images.
    Cache(CacheConfig),
}

// =============================================================================
// Serve
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "ZOOMTILE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "ZOOMTILE_PORT")]
    pub port: u16,

    /// Directory served as the URL root.
    #[arg(long, default_value = ".", env = "ZOOMTILE_ROOT")]
    pub root: PathBuf,

    /// Tile edge length in pixels for tile-index requests.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "ZOOMTILE_TILE_SIZE")]
    pub tile_size: u32,

    /// Smallest accepted zoom (negative zooms in).
    #[arg(long, default_value_t = DEFAULT_ZOOM_MIN, env = "ZOOMTILE_ZOOM_MIN", allow_hyphen_values = true)]
    pub zoom_min: i32,

    /// Largest accepted zoom (each step halves the resolution).
    #[arg(long, default_value_t = DEFAULT_ZOOM_MAX, env = "ZOOMTILE_ZOOM_MAX", allow_hyphen_values = true)]
    pub zoom_max: i32,

    /// Largest accepted output area (width * height) in pixels.
    #[arg(long, default_value_t = DEFAULT_MAX_AREA, env = "ZOOMTILE_MAX_AREA")]
    pub max_area: u64,

    /// Capacity of the rendered tile cache in bytes.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_CAPACITY, env = "ZOOMTILE_TILE_CACHE_BYTES")]
    pub tile_cache_bytes: usize,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "ZOOMTILE_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "ZOOMTILE_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        if self.zoom_min > self.zoom_max {
            return Err(format!(
                "zoom_min ({}) must not be greater than zoom_max ({})",
                self.zoom_min, self.zoom_max
            ));
        }
        if self.max_area < u64::from(self.tile_size) * u64::from(self.tile_size) {
            return Err("max_area must fit at least one tile".to_string());
        }
        if self.tile_cache_bytes == 0 {
            return Err("tile_cache_bytes must be greater than 0".to_string());
        }
        if !self.root.is_dir() {
            return Err(format!(
                "Image root {} is not a directory. Set --root or ZOOMTILE_ROOT",
                self.root.display()
            ));
        }
        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tile_limits(&self) -> TileLimits {
        TileLimits {
            tile_size: self.tile_size,
            zoom_min: self.zoom_min,
            zoom_max: self.zoom_max,
            max_area: self.max_area,
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        let mut router_config = RouterConfig::new()
            .with_cache_max_age(self.cache_max_age)
            .with_tracing(!self.no_tracing);

        if let Some(ref origins) = self.cors_origins {
            router_config = router_config.with_cors_origins(origins.clone());
        }

        router_config
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Which cache artifacts a recursive scan reports.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArtifactMode {
    /// Only source images
    #[default]
    Exclude,
    /// Source images and artifacts
    Include,
    /// Only artifacts
    Only,
}

impl From<ArtifactMode> for CacheFilter {
    fn from(mode: ArtifactMode) -> Self {
        match mode {
            ArtifactMode::Exclude => CacheFilter::Exclude,
            ArtifactMode::Include => CacheFilter::Include,
            ArtifactMode::Only => CacheFilter::Only,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CacheConfig {
    /// Image files, directories (with --recursive), or multipart parts.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Scan directory arguments recursively for image files.
    #[arg(short, long, default_value_t = false)]
    pub recursive: bool,

    /// Which cache artifacts a recursive scan picks up.
    #[arg(long, value_enum, default_value_t = ArtifactMode::Exclude)]
    pub artifacts: ArtifactMode,

    /// Treat all paths as parts of one image, e.g. `(.+)_(\d+)_(\d+)\.(png)`.
    ///
    /// Groups are base name, row, column and extension.
    #[arg(long, value_name = "REGEX")]
    pub multipart_pattern: Option<String>,

    /// Rebuild caches even when they are fresh.
    #[arg(long, default_value_t = false)]
    pub update: bool,

    /// Background pixel for uncovered areas as 1-4 hex bytes (e.g. ff0000ff).
    #[arg(long, value_name = "HEX")]
    pub background: Option<String>,

    /// Render one region of each processed image to this file.
    #[arg(long, value_name = "FILE")]
    pub tile_out: Option<PathBuf>,

    /// Region origin X in full-resolution pixels.
    #[arg(long, default_value_t = 0)]
    pub tile_x: u64,

    /// Region origin Y in full-resolution pixels.
    #[arg(long, default_value_t = 0)]
    pub tile_y: u64,

    /// Region width in output pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE)]
    pub tile_width: u32,

    /// Region height in output pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE)]
    pub tile_height: u32,

    /// Zoom of the rendered region (-/0/+).
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub tile_zoom: i32,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl CacheConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ref pattern) = self.multipart_pattern {
            regex::Regex::new(pattern)
                .map_err(|e| format!("Invalid --multipart-pattern={}: {}", pattern, e))?;
            if self.recursive {
                return Err("--multipart-pattern cannot be combined with --recursive".to_string());
            }
        }
        if let Some(ref background) = self.background {
            parse_background(background)
                .map_err(|e| format!("Invalid --background={}: {}", background, e))?;
        }
        if self.tile_out.is_some() && (self.tile_width == 0 || self.tile_height == 0) {
            return Err("--tile-width and --tile-height must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Compiled multipart pattern, if one was given.
    pub fn multipart_regex(&self) -> Result<Option<regex::Regex>, String> {
        self.multipart_pattern
            .as_deref()
            .map(|pattern| {
                regex::Regex::new(pattern)
                    .map_err(|e| format!("Invalid --multipart-pattern={}: {}", pattern, e))
            })
            .transpose()
    }

    pub fn image_params(&self) -> Result<ImageParams, String> {
        let background = self
            .background
            .as_deref()
            .map(parse_background)
            .transpose()
            .map_err(|e| format!("Invalid --background: {}", e))?;
        Ok(ImageParams { background })
    }

    pub fn refresh_options(&self) -> Result<RefreshOptions, String> {
        let tile = self.tile_out.as_ref().map(|_| {
            (
                PixelRegion {
                    x: self.tile_x,
                    y: self.tile_y,
                    width: self.tile_width,
                    height: self.tile_height,
                },
                self.tile_zoom,
            )
        });

        Ok(RefreshOptions {
            force: self.update,
            params: self.image_params()?,
            tile,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
