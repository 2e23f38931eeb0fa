//! Source image discovery.
//!
//! A [`SourceImage`] describes one logical image before any cache work is
//! done: its name, the file (or grid of files) holding its pixels, and the
//! path of the cache artifact derived from it.
//!
//! - [`scan`] walks a directory tree and classifies every file
//! - [`assemble_parts`] groups `name_ROW_COL.ext` style files into one mosaic

mod parts;
mod scan;

use std::path::{Path, PathBuf};

use crate::engine::ImageFormat;

pub use parts::assemble_parts;
pub use scan::{scan, scan_file, CacheFilter};

/// Whether a file holds source pixels or an existing cache artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    RawSource,
    CacheArtifact,
}

/// Row-major matrix of part paths.
///
/// Cells may be empty for sparse mosaics; a single-file source is a 1x1 grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartGrid {
    rows: usize,
    cols: usize,
    cells: Vec<Option<PathBuf>>,
}

impl PartGrid {
    /// Create an empty grid.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![None; rows * cols],
        }
    }

    /// A 1x1 grid holding one file.
    pub fn single(path: impl Into<PathBuf>) -> Self {
        Self {
            rows: 1,
            cols: 1,
            cells: vec![Some(path.into())],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Place a path at a 0-based cell, returning the path it replaced.
    ///
    /// Out-of-range cells are ignored and return `None`.
    pub fn set(&mut self, row: usize, col: usize, path: PathBuf) -> Option<PathBuf> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.cells[row * self.cols + col].replace(path)
    }

    /// The path at a 0-based cell, if any.
    pub fn get(&self, row: usize, col: usize) -> Option<&Path> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.cells[row * self.cols + col].as_deref()
    }

    /// One row of cells.
    pub fn row(&self, row: usize) -> &[Option<PathBuf>] {
        let start = row * self.cols;
        &self.cells[start..start + self.cols]
    }

    /// All filled cells in row-major order.
    pub fn parts(&self) -> impl Iterator<Item = &Path> {
        self.cells.iter().filter_map(|cell| cell.as_deref())
    }

    /// The first filled cell, used as the primary source.
    pub fn first(&self) -> Option<&Path> {
        self.parts().next()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Option::is_none)
    }
}

/// One logical image found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    /// Logical name (the file path, or the composite name of a mosaic)
    pub name: String,

    /// Files holding the source pixels
    pub parts: PartGrid,

    pub kind: SourceKind,

    /// Format reported by the engine for the (first) file
    pub format: ImageFormat,

    /// Where the cache artifact lives (the file itself for artifacts)
    pub cache_path: PathBuf,
}
