use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};

use crate::engine::ImageEngine;
use crate::error::AssemblyError;

use super::{PartGrid, SourceImage, SourceKind};

/// Largest number of cells a part grid may span.
pub const MAX_GRID_CELLS: usize = 1 << 16;

/// Group `paths` matching `pattern` into one mosaic image.
///
/// `pattern` must capture, in order: base name, 1-based row, 1-based column
/// and extension (e.g. `^(.+)_(\d+)_(\d+)\.(png)$`). Paths that do not match
/// are ignored. The composite image is named `base.ext`.
pub async fn assemble_parts<E>(
    engine: &E,
    paths: &[PathBuf],
    pattern: &Regex,
) -> Result<SourceImage, AssemblyError>
where
    E: ImageEngine + ?Sized,
{
    let groups = pattern.captures_len() - 1;
    if groups < 4 {
        return Err(AssemblyError::InvalidPattern(groups));
    }

    let mut composite: Option<(String, String)> = None;
    let mut cells: BTreeMap<(usize, usize), PathBuf> = BTreeMap::new();
    let mut format = None;
    let (mut rows, mut cols) = (0, 0);

    for path in paths {
        let text = path.to_string_lossy();
        let Some(caps) = pattern.captures(&text) else {
            debug!(path = %path.display(), "not a part, skipping");
            continue;
        };

        let group = |i: usize| caps.get(i).map_or("", |m| m.as_str());
        let (base, ext) = (group(1).to_string(), group(4).to_string());
        let row = parse_index(path, "row", group(2))?;
        let col = parse_index(path, "col", group(3))?;

        match &composite {
            None => composite = Some((base, ext)),
            Some((first_base, first_ext)) if *first_base != base || *first_ext != ext => {
                return Err(AssemblyError::MixedNames {
                    first: format!("{}.{}", first_base, first_ext),
                    other: format!("{}.{}", base, ext),
                });
            }
            Some(_) => {}
        }

        let sniffed = engine
            .sniff(path)
            .await
            .map_err(|source| AssemblyError::Sniff {
                path: path.clone(),
                source,
            })?;
        let Some(part_format) = sniffed else {
            return Err(AssemblyError::NotAnImage { path: path.clone() });
        };
        format.get_or_insert(part_format);

        debug!(path = %path.display(), row, col, "found part");
        if let Some(previous) = cells.insert((row, col), path.clone()) {
            warn!(
                row,
                col,
                previous = %previous.display(),
                path = %path.display(),
                "duplicate part, using the later path"
            );
        }

        rows = rows.max(row);
        cols = cols.max(col);
    }

    let (Some((base, ext)), Some(format)) = (composite, format) else {
        return Err(AssemblyError::Empty);
    };

    match rows.checked_mul(cols) {
        Some(cells) if cells <= MAX_GRID_CELLS => {}
        _ => {
            return Err(AssemblyError::GridTooLarge {
                rows,
                cols,
                limit: MAX_GRID_CELLS,
            })
        }
    }

    let mut parts = PartGrid::new(rows, cols);
    for ((row, col), path) in cells {
        parts.set(row - 1, col - 1, path);
    }

    let name = format!("{}.{}", base, ext);
    let cache_path = engine
        .cache_path(Path::new(&name))
        .map_err(AssemblyError::CachePath)?;

    debug!(name = %name, rows, cols, "assembled multi-part image");
    Ok(SourceImage {
        name,
        parts,
        kind: SourceKind::RawSource,
        format,
        cache_path,
    })
}

fn parse_index(path: &Path, axis: &'static str, value: &str) -> Result<usize, AssemblyError> {
    match value.parse::<usize>() {
        Ok(index) if index > 0 => Ok(index),
        _ => Err(AssemblyError::InvalidIndex {
            path: path.to_path_buf(),
            axis,
            value: value.to_string(),
        }),
    }
}
