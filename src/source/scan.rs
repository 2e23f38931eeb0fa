use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::engine::{ImageEngine, ImageFormat};
use crate::error::{EngineError, ScanError};

use super::{PartGrid, SourceImage, SourceKind};

/// Which cache artifacts a scan returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheFilter {
    /// Only raw sources
    #[default]
    Exclude,
    /// Raw sources and artifacts
    Include,
    /// Only artifacts
    Only,
}

impl CacheFilter {
    fn accepts(&self, kind: SourceKind) -> bool {
        match (self, kind) {
            (CacheFilter::Include, _) => true,
            (CacheFilter::Exclude, SourceKind::RawSource) => true,
            (CacheFilter::Only, SourceKind::CacheArtifact) => true,
            _ => false,
        }
    }
}

/// Classify one file.
///
/// Returns `None` for files the engine does not recognize and for sources
/// without a derivable cache path.
pub async fn scan_file<E>(engine: &E, path: &Path) -> Result<Option<SourceImage>, EngineError>
where
    E: ImageEngine + ?Sized,
{
    let Some(format) = engine.sniff(path).await? else {
        return Ok(None);
    };

    let name = path.to_string_lossy().into_owned();
    let image = match format {
        ImageFormat::Cache => SourceImage {
            name,
            parts: PartGrid::single(path),
            kind: SourceKind::CacheArtifact,
            format,
            cache_path: path.to_path_buf(),
        },
        _ => {
            let cache_path = match engine.cache_path(path) {
                Ok(cache_path) => cache_path,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping source without cache path");
                    return Ok(None);
                }
            };
            SourceImage {
                name,
                parts: PartGrid::single(path),
                kind: SourceKind::RawSource,
                format,
                cache_path,
            }
        }
    };

    Ok(Some(image))
}

/// Recursively find images under `root`, sorted by path.
///
/// Hidden entries (other than the root itself) are skipped along with
/// everything beneath them. A file that cannot be sniffed is skipped with a
/// warning; only failures walking the tree are errors.
pub async fn scan<E>(
    engine: &E,
    root: &Path,
    filter: CacheFilter,
) -> Result<Vec<SourceImage>, ScanError>
where
    E: ImageEngine + ?Sized,
{
    let walk_root = root.to_path_buf();
    let files = tokio::task::spawn_blocking(move || collect_files(&walk_root))
        .await
        .map_err(|e| ScanError::Task(e.to_string()))??;

    let mut images = Vec::new();
    for path in files {
        match scan_file(engine, &path).await {
            Ok(Some(image)) if filter.accepts(image.kind) => images.push(image),
            Ok(Some(image)) => {
                debug!(path = %path.display(), kind = ?image.kind, "filtered out");
            }
            Ok(None) => {
                debug!(path = %path.display(), "not an image");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable file");
            }
        }
    }

    debug!(root = %root.display(), count = images.len(), "scan complete");
    Ok(images)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

fn collect_files(root: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}
