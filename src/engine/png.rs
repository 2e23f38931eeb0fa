//! PNG-backed cache engine.
//!
//! Sources are PNG files (or a grid of equally-sized PNG parts). The cache
//! artifact stores the composed image as raw RGBA8 rows behind a one-block
//! header, so any region can be read with one positioned read per row.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::{Rgba, RgbaImage};
use tracing::{debug, info};

use crate::error::EngineError;
use crate::source::PartGrid;
use crate::tile::PixelRegion;

use super::artifact::{
    block_count, has_magic, ArtifactHeader, Probe, Signature, BLOCK_SIZE, BYTES_PER_PIXEL,
    CACHE_VERSION,
};
use super::{
    CacheInfo, CacheStatus, ImageEngine, ImageFormat, ImageInfo, ImageParams, Pixel, SourceInfo,
};

const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// Extension given to cache artifacts.
pub const CACHE_EXTENSION: &str = "cache";

/// Largest zoom step (in either direction) the engine renders.
const MAX_ZOOM_SHIFT: u32 = 16;

// =============================================================================
// Handle
// =============================================================================

/// Handle on one cache artifact.
pub struct CacheHandle {
    path: PathBuf,
    attached: Option<Arc<Attached>>,
}

impl CacheHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    fn attached(&self) -> Result<Arc<Attached>, EngineError> {
        self.attached
            .clone()
            .ok_or_else(|| EngineError::NotAttached(self.path.clone()))
    }
}

/// An artifact opened for reading.
struct Attached {
    path: PathBuf,
    header: ArtifactHeader,
    file: Mutex<File>,
}

impl Attached {
    fn open(path: &Path) -> Result<Self, EngineError> {
        let mut file = File::open(path).map_err(|e| EngineError::io(path, e))?;
        let block = read_header_block(&mut file, path)?;

        let header = match ArtifactHeader::decode(&block) {
            Probe::Valid(header) => header,
            Probe::BadMagic => {
                return Err(EngineError::Corrupt {
                    path: path.to_path_buf(),
                    reason: "not a cache artifact".to_string(),
                })
            }
            Probe::Version(found) => {
                return Err(EngineError::Incompatible {
                    found,
                    expected: CACHE_VERSION,
                })
            }
            Probe::Corrupt(reason) => {
                return Err(EngineError::Corrupt {
                    path: path.to_path_buf(),
                    reason,
                })
            }
        };

        let len = file
            .metadata()
            .map_err(|e| EngineError::io(path, e))?
            .len();
        if len < header.file_len() {
            return Err(EngineError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("{} bytes, expected {}", len, header.file_len()),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            header,
            file: Mutex::new(file),
        })
    }

    /// Read pixels `x0..x1` of row `y` into `buf`.
    fn read_span(&self, x0: u64, x1: u64, y: u64, buf: &mut Vec<u8>) -> Result<(), EngineError> {
        buf.clear();
        if x1 <= x0 {
            return Ok(());
        }
        buf.resize(((x1 - x0) * BYTES_PER_PIXEL) as usize, 0);

        let mut file = self
            .file
            .lock()
            .map_err(|_| EngineError::Task("cache file lock poisoned".to_string()))?;
        file.seek(SeekFrom::Start(self.header.pixel_offset(x0, y)))
            .map_err(|e| EngineError::io(&self.path, e))?;
        file.read_exact(buf)
            .map_err(|e| EngineError::io(&self.path, e))?;
        Ok(())
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Cache engine for PNG sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngEngine;

impl PngEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImageEngine for PngEngine {
    type Handle = CacheHandle;

    async fn sniff(&self, path: &Path) -> Result<Option<ImageFormat>, EngineError> {
        let path = path.to_path_buf();
        blocking(move || {
            let file = File::open(&path).map_err(|e| EngineError::io(&path, e))?;
            let mut magic = Vec::with_capacity(PNG_MAGIC.len());
            file.take(PNG_MAGIC.len() as u64)
                .read_to_end(&mut magic)
                .map_err(|e| EngineError::io(&path, e))?;

            if magic == PNG_MAGIC {
                Ok(Some(ImageFormat::Png))
            } else if has_magic(&magic) {
                Ok(Some(ImageFormat::Cache))
            } else {
                Ok(None)
            }
        })
        .await
    }

    fn cache_path(&self, path: &Path) -> Result<PathBuf, EngineError> {
        if path.extension().is_none() {
            return Err(EngineError::InvalidPath {
                path: path.to_path_buf(),
                reason: "no file extension".to_string(),
            });
        }
        Ok(path.with_extension(CACHE_EXTENSION))
    }

    async fn open(&self, cache_path: &Path) -> Result<CacheHandle, EngineError> {
        if cache_path.as_os_str().is_empty() {
            return Err(EngineError::InvalidPath {
                path: PathBuf::new(),
                reason: "empty cache path".to_string(),
            });
        }
        Ok(CacheHandle {
            path: cache_path.to_path_buf(),
            attached: None,
        })
    }

    async fn status(
        &self,
        handle: &CacheHandle,
        sources: &PartGrid,
    ) -> Result<CacheStatus, EngineError> {
        let path = handle.path.clone();
        let sources = sources.clone();
        blocking(move || cache_status(&path, &sources)).await
    }

    async fn attach(&self, handle: &mut CacheHandle) -> Result<(), EngineError> {
        let path = handle.path.clone();
        let attached = blocking(move || Attached::open(&path)).await?;
        handle.attached = Some(Arc::new(attached));
        Ok(())
    }

    async fn update(
        &self,
        handle: &mut CacheHandle,
        sources: &PartGrid,
        params: &ImageParams,
    ) -> Result<(), EngineError> {
        // Drop any previous attachment before the artifact is replaced.
        handle.attached = None;

        let path = handle.path.clone();
        let sources = sources.clone();
        let background = params.background();
        let attached = blocking(move || {
            build_artifact(&path, &sources, background)?;
            Attached::open(&path)
        })
        .await?;

        handle.attached = Some(Arc::new(attached));
        Ok(())
    }

    async fn info(&self, handle: &CacheHandle) -> Result<ImageInfo, EngineError> {
        let attached = handle.attached()?;
        blocking(move || image_info(&attached)).await
    }

    async fn render_tile(
        &self,
        handle: &CacheHandle,
        region: PixelRegion,
        zoom: i32,
    ) -> Result<Bytes, EngineError> {
        let attached = handle.attached()?;
        blocking(move || render_region(&attached, region, zoom)).await
    }

    async fn close(&self, handle: CacheHandle) -> Result<(), EngineError> {
        debug!(path = %handle.path.display(), "closing cache handle");
        drop(handle);
        Ok(())
    }
}

async fn blocking<T, F>(f: F) -> Result<T, EngineError>
where
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EngineError::Task(e.to_string()))?
}

fn read_header_block(file: &mut File, path: &Path) -> Result<Vec<u8>, EngineError> {
    let mut block = Vec::with_capacity(BLOCK_SIZE as usize);
    file.take(BLOCK_SIZE)
        .read_to_end(&mut block)
        .map_err(|e| EngineError::io(path, e))?;
    Ok(block)
}

fn cache_status(path: &Path, sources: &PartGrid) -> Result<CacheStatus, EngineError> {
    let signature = Signature::of_parts(sources)?;

    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CacheStatus::None),
        Err(e) => return Err(EngineError::io(path, e)),
    };
    let block = read_header_block(&mut file, path)?;

    let status = match ArtifactHeader::decode(&block) {
        Probe::Valid(header) if header.signature == signature => CacheStatus::Fresh,
        Probe::Valid(_) => CacheStatus::Stale,
        Probe::BadMagic | Probe::Version(_) | Probe::Corrupt(_) => CacheStatus::Incompat,
    };
    Ok(status)
}

fn system_time_utc(time: std::time::SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

fn image_info(attached: &Attached) -> Result<ImageInfo, EngineError> {
    let header = &attached.header;
    let metadata =
        std::fs::metadata(&attached.path).map_err(|e| EngineError::io(&attached.path, e))?;
    let modified = metadata
        .modified()
        .map_err(|e| EngineError::io(&attached.path, e))?;

    let source = std::fs::metadata(header.source_path())
        .ok()
        .and_then(|m| {
            m.modified().ok().map(|modified| SourceInfo {
                modified_time: system_time_utc(modified),
                bytes: m.len(),
            })
        });

    Ok(ImageInfo {
        format: header.format,
        width: header.width,
        height: header.height,
        bits_per_pixel: header.bits_per_pixel,
        cache: CacheInfo {
            version: header.version,
            modified_time: system_time_utc(modified),
            bytes: metadata.len(),
            blocks: block_count(metadata.len()),
        },
        source,
    })
}

// =============================================================================
// Update
// =============================================================================

fn decode_part(path: &Path) -> Result<image::DynamicImage, EngineError> {
    image::open(path).map_err(|e| match e {
        image::ImageError::IoError(err) => EngineError::io(path, err),
        other => EngineError::Decode {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    })
}

fn part_dimensions(path: &Path) -> Result<(u32, u32), EngineError> {
    image::image_dimensions(path).map_err(|e| match e {
        image::ImageError::IoError(err) => EngineError::io(path, err),
        other => EngineError::Decode {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    })
}

/// Compose `sources` into a new artifact at `cache_path`.
///
/// The artifact is written to a temporary file and renamed into place.
fn build_artifact(
    cache_path: &Path,
    sources: &PartGrid,
    background: Pixel,
) -> Result<(), EngineError> {
    let first = sources.first().ok_or(EngineError::EmptyParts)?;
    let signature = Signature::of_parts(sources)?;
    let (part_width, part_height) = part_dimensions(first)?;

    let too_large = || EngineError::Decode {
        path: first.to_path_buf(),
        message: "mosaic dimensions overflow".to_string(),
    };
    let width = u32::try_from(sources.cols())
        .ok()
        .and_then(|cols| part_width.checked_mul(cols))
        .ok_or_else(too_large)?;
    let height = u32::try_from(sources.rows())
        .ok()
        .and_then(|rows| part_height.checked_mul(rows))
        .ok_or_else(too_large)?;

    // Recorded absolute so readers in another working directory still find it.
    let primary = std::fs::canonicalize(first).map_err(|e| EngineError::io(first, e))?;

    let temp_path = cache_path.with_extension(format!("{}.tmp", CACHE_EXTENSION));
    let result = write_artifact(
        &temp_path,
        sources,
        background,
        (part_width, part_height),
        (width, height),
        signature,
        &primary,
    )
    .and_then(|()| {
        std::fs::rename(&temp_path, cache_path).map_err(|e| EngineError::io(cache_path, e))
    });

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    } else {
        info!(
            path = %cache_path.display(),
            width,
            height,
            parts = sources.parts().count(),
            "cache artifact written"
        );
    }
    result
}

fn write_artifact(
    temp_path: &Path,
    sources: &PartGrid,
    background: Pixel,
    (part_width, part_height): (u32, u32),
    (width, height): (u32, u32),
    signature: Signature,
    primary: &Path,
) -> Result<(), EngineError> {
    let io_err = |e| EngineError::io(temp_path, e);

    let file = File::create(temp_path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);

    // Header block is written last, once the source bit depth is known.
    writer.write_all(&[0u8; BLOCK_SIZE as usize]).map_err(io_err)?;

    let mut bits_per_pixel = None;
    let part_row_bytes = part_width as usize * BYTES_PER_PIXEL as usize;
    let mut row = Vec::with_capacity(width as usize * BYTES_PER_PIXEL as usize);

    for grid_row in 0..sources.rows() {
        let mut decoded: Vec<Option<RgbaImage>> = Vec::with_capacity(sources.cols());
        for cell in sources.row(grid_row) {
            let Some(path) = cell else {
                decoded.push(None);
                continue;
            };

            let image = decode_part(path)?;
            if image.width() != part_width || image.height() != part_height {
                return Err(EngineError::PartMismatch {
                    path: path.clone(),
                    expected: (part_width, part_height),
                    actual: (image.width(), image.height()),
                });
            }
            bits_per_pixel.get_or_insert(image.color().bits_per_pixel() as u32);
            debug!(part = %path.display(), "decoded part");
            decoded.push(Some(image.to_rgba8()));
        }

        for y in 0..part_height as usize {
            row.clear();
            for part in &decoded {
                match part {
                    Some(image) => {
                        let start = y * part_row_bytes;
                        row.extend_from_slice(&image.as_raw()[start..start + part_row_bytes]);
                    }
                    None => {
                        for _ in 0..part_width {
                            row.extend_from_slice(&background);
                        }
                    }
                }
            }
            writer.write_all(&row).map_err(io_err)?;
        }
    }

    let header = ArtifactHeader {
        version: CACHE_VERSION,
        width,
        height,
        bits_per_pixel: bits_per_pixel.unwrap_or(32),
        format: ImageFormat::Png,
        signature,
        source_path: primary.to_path_buf(),
    };

    let mut file = writer.into_inner().map_err(|e| io_err(e.into_error()))?;
    file.seek(SeekFrom::Start(0)).map_err(io_err)?;
    file.write_all(&header.encode()?).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    Ok(())
}

// =============================================================================
// Render
// =============================================================================

/// Render `region` of the artifact, scaled by `2^zoom` source pixels per
/// output pixel (zoom out) or `2^-zoom` output pixels per source pixel
/// (zoom in). Output pixels beyond the image edge stay transparent.
fn render_region(
    attached: &Attached,
    region: PixelRegion,
    zoom: i32,
) -> Result<Bytes, EngineError> {
    let header = &attached.header;
    let (width, height) = (header.width as u64, header.height as u64);

    if region.x >= width || region.y >= height {
        return Err(EngineError::TileClip {
            x: region.x,
            y: region.y,
            width: header.width,
            height: header.height,
        });
    }
    if zoom.unsigned_abs() > MAX_ZOOM_SHIFT {
        return Err(EngineError::UnsupportedZoom(zoom));
    }

    let mut out = RgbaImage::new(region.width, region.height);
    let mut span = Vec::new();

    if zoom >= 0 {
        let factor = 1u64 << zoom;
        let x_end = (region.x + region.width as u64 * factor).min(width);
        let mut sums = vec![[0u64; 4]; region.width as usize];
        let mut counts = vec![0u64; region.width as usize];

        for out_y in 0..region.height {
            let y0 = region.y + out_y as u64 * factor;
            if y0 >= height {
                break;
            }
            let y1 = (y0 + factor).min(height);

            sums.iter_mut().for_each(|s| *s = [0; 4]);
            counts.iter_mut().for_each(|c| *c = 0);

            for y in y0..y1 {
                attached.read_span(region.x, x_end, y, &mut span)?;
                for (i, px) in span.chunks_exact(4).enumerate() {
                    let out_x = i / factor as usize;
                    for c in 0..4 {
                        sums[out_x][c] += px[c] as u64;
                    }
                    counts[out_x] += 1;
                }
            }

            for (out_x, (sum, &count)) in sums.iter().zip(counts.iter()).enumerate() {
                if count == 0 {
                    continue;
                }
                let avg = sum.map(|s| ((s + count / 2) / count) as u8);
                out.put_pixel(out_x as u32, out_y, Rgba(avg));
            }
        }
    } else {
        let factor = 1u64 << zoom.unsigned_abs();
        let x_end = (region.x + (region.width as u64).div_ceil(factor)).min(width);
        let mut loaded_row = None;

        for out_y in 0..region.height {
            let y = region.y + out_y as u64 / factor;
            if y >= height {
                break;
            }
            if loaded_row != Some(y) {
                attached.read_span(region.x, x_end, y, &mut span)?;
                loaded_row = Some(y);
            }

            for out_x in 0..region.width {
                let i = (out_x as u64 / factor) as usize * BYTES_PER_PIXEL as usize;
                let Some(px) = span.get(i..i + 4) else {
                    break;
                };
                out.put_pixel(out_x, out_y, Rgba([px[0], px[1], px[2], px[3]]));
            }
        }
    }

    let mut buf = Vec::new();
    out.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| EngineError::Encode(e.to_string()))?;
    Ok(Bytes::from(buf))
}

// =============================================================================
// Tests
// =============================================================================
