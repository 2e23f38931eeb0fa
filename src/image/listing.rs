use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use crate::engine::{ImageEngine, ImageFormat};
use crate::error::{EngineError, ImageError};

/// What a directory entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Directory,
    Image,
}

/// One visible entry of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    /// Child name; directories end in `/`, images have no extension
    pub name: String,
    pub kind: EntryKind,
}

/// List the subdirectories and cached images of `dir`, sorted by name.
///
/// Hidden entries are skipped. Only files the engine recognizes as cache
/// artifacts are listed as images.
pub async fn list_dir<E>(engine: &E, dir: &Path) -> Result<Vec<DirEntry>, ImageError>
where
    E: ImageEngine + ?Sized,
{
    let mut read_dir = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| EngineError::io(dir, e))?;

    let mut entries = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| EngineError::io(dir, e))?
    {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if file_name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata.file_type(),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping entry");
                continue;
            }
        };

        if file_type.is_dir() {
            entries.push(DirEntry {
                name: format!("{}/", file_name),
                kind: EntryKind::Directory,
            });
        } else if file_type.is_file() {
            match engine.sniff(&path).await {
                Ok(Some(ImageFormat::Cache)) => entries.push(DirEntry {
                    name: strip_extension(file_name).to_string(),
                    kind: EntryKind::Image,
                }),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
            }
        }
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn strip_extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => &file_name[..dot],
        _ => file_name,
    }
}
