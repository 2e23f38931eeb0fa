use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors reported by a pixel cache engine
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The file (source part or cache artifact) does not exist
    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Any other filesystem failure
    #[error("I/O error on {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    /// The path cannot be used for this operation (e.g. no extension to replace)
    #[error("Invalid path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// A source image could not be decoded
    #[error("Failed to decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },

    /// A rendered region could not be encoded
    #[error("Failed to encode tile: {0}")]
    Encode(String),

    /// The cache artifact is truncated or its header is unreadable
    #[error("Corrupt cache {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// The cache artifact was written with another schema version
    #[error("Incompatible cache version {found} (expected {expected})")]
    Incompatible { found: u32, expected: u32 },

    /// Read operation on a handle that was never attached
    #[error("Cache not attached: {}", .0.display())]
    NotAttached(PathBuf),

    /// The region origin lies outside the image
    #[error("Tile origin ({x}, {y}) is outside the {width}x{height} image")]
    TileClip {
        x: u64,
        y: u64,
        width: u32,
        height: u32,
    },

    /// Zoom factor beyond what the engine can render
    #[error("Unsupported zoom level: {0}")]
    UnsupportedZoom(i32),

    /// Mosaic parts do not share one size
    #[error("Part {} is {}x{}, expected {}x{}", path.display(), actual.0, actual.1, expected.0, expected.1)]
    PartMismatch {
        path: PathBuf,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// The part grid holds no files at all
    #[error("No source parts to build from")]
    EmptyParts,

    /// A blocking engine task panicked or was cancelled
    #[error("Engine task failed: {0}")]
    Task(String),
}

impl EngineError {
    /// Map an I/O error on `path`, keeping "not found" distinct.
    pub fn io(path: &Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            EngineError::NotFound(path.to_path_buf())
        } else {
            EngineError::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            }
        }
    }

    /// Whether a read failure leaves the open handle unusable.
    ///
    /// Request-shaped failures (origin, zoom, encoding) do not.
    pub fn is_handle_failure(&self) -> bool {
        matches!(
            self,
            EngineError::NotFound(_)
                | EngineError::Io { .. }
                | EngineError::Corrupt { .. }
                | EngineError::Incompatible { .. }
                | EngineError::NotAttached(_)
                | EngineError::Task(_)
        )
    }

    /// Whether this error means the underlying file is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}

/// Invalid tile or viewport request parameters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid zoom level: {zoom} (allowed {min}..={max})")]
    ZoomOutOfRange { zoom: i32, min: i32, max: i32 },

    #[error("Invalid width x height: {width}x{height} exceeds {limit} pixels")]
    AreaTooLarge { width: u32, height: u32, limit: u64 },

    #[error("Invalid width x height: {width}x{height} must not be empty")]
    EmptyArea { width: u32, height: u32 },

    #[error("Ambiguous request: use either tile-x/tile-y or w/h, not both")]
    AmbiguousMode,

    #[error("Missing request parameters: use either tile-x/tile-y or w/h")]
    MissingMode,

    #[error("Missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for parameter {name}: {value:?}")]
    InvalidParameter { name: &'static str, value: String },
}

/// Errors resolving an external path under the image root
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The cleaned path would climb above the root
    #[error("Invalid path: {0}")]
    Escape(String),
}

/// Errors assembling a multi-part source image
#[derive(Debug, Clone, Error)]
pub enum AssemblyError {
    #[error("Multi-part pattern needs 4 capture groups, found {0}")]
    InvalidPattern(usize),

    #[error("Invalid {axis} index {value:?} in {}", path.display())]
    InvalidIndex {
        path: PathBuf,
        axis: &'static str,
        value: String,
    },

    #[error("Failed to read part {}: {source}", path.display())]
    Sniff {
        path: PathBuf,
        #[source]
        source: EngineError,
    },

    #[error("Part {} is not a recognized image", path.display())]
    NotAnImage { path: PathBuf },

    #[error("Parts describe more than one image: {first} and {other}")]
    MixedNames { first: String, other: String },

    #[error("Part grid of {rows}x{cols} exceeds {limit} cells")]
    GridTooLarge {
        rows: usize,
        cols: usize,
        limit: usize,
    },

    #[error("No paths matched the multi-part pattern")]
    Empty,

    #[error("Failed to derive cache path: {0}")]
    CachePath(#[source] EngineError),
}

/// Errors walking a directory tree for sources
#[derive(Debug, Clone, Error)]
pub enum ScanError {
    #[error("Failed to walk {}: {message}", path.display())]
    Walk { path: PathBuf, message: String },

    #[error("Scan task failed: {0}")]
    Task(String),
}

impl From<walkdir::Error> for ScanError {
    fn from(err: walkdir::Error) -> Self {
        ScanError::Walk {
            path: err.path().map(Path::to_path_buf).unwrap_or_default(),
            message: err.to_string(),
        }
    }
}

/// Errors from the offline cache maintenance workflow
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Freshness could not be determined; fatal for this source
    #[error("Cache status for {} could not be determined: {source}", path.display())]
    Status {
        path: PathBuf,
        #[source]
        source: EngineError,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),
}

/// Errors on the serving path, translated to HTTP by the server
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    /// No image (or directory) under this name
    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
